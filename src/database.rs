// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Database export and import.
//!
//! Thin adapters around the `mysqldump` and `mysql` clients. Exports run in a
//! single transaction without tablespaces, skip the configured tables, and
//! are gzip compressed. Imports are destructive: the target database is
//! dropped, recreated, and then filled from the dump.
//!
//! # Import Stages
//!
//! An import walks through [`ImportStage::Preparing`] (drop and create),
//! [`ImportStage::Importing`] (stream dump), and [`ImportStage::Verifying`]
//! (count tables). Failing to drop is tolerated because the database may not
//! exist yet. Any other failure aborts the remaining stages. Counting zero
//! tables after a successful import is only a warning, since the restore
//! client itself already reported success.

use crate::{
    config::DatabaseSettings,
    syscall::{Call, CallOutput, Syscall, SyscallError},
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{remove_file, File},
    io::{copy, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Dump client program.
pub const DUMP_PROGRAM: &str = "mysqldump";

/// Restore client program.
pub const CLIENT_PROGRAM: &str = "mysql";

/// Stage of a database import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Preparing,
    Importing,
    Verifying,
    Done,
}

impl Display for ImportStage {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Preparing => fmt.write_str("preparing"),
            Self::Importing => fmt.write_str("importing"),
            Self::Verifying => fmt.write_str("verifying"),
            Self::Done => fmt.write_str("done"),
        }
    }
}

/// Outcome of a successful export.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Warnings the dump client printed while still succeeding.
    pub warnings: Option<String>,
}

/// Outcome of a successful import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Number of tables found after import.
    pub tables: u64,

    /// Non-fatal problems noticed along the way.
    pub warnings: Vec<String>,
}

/// Export database through dump client.
#[derive(Debug)]
pub struct DatabaseExporter<'a, S: Syscall> {
    syscall: &'a S,
    settings: &'a DatabaseSettings,
}

impl<'a, S: Syscall> DatabaseExporter<'a, S> {
    /// Construct new exporter.
    pub fn new(syscall: &'a S, settings: &'a DatabaseSettings) -> Self {
        Self { syscall, settings }
    }

    /// Export database into gzip compressed dump at target path.
    ///
    /// The uncompressed dump is written to `scratch` first, and removed after
    /// compression.
    ///
    /// # Errors
    ///
    /// - Return [`DatabaseError::ExportFailed`] if dump client fails.
    /// - Return [`DatabaseError::Io`] if compression fails.
    #[instrument(skip(self, dest, scratch), level = "debug")]
    pub fn export(&self, dest: impl AsRef<Path>, scratch: impl AsRef<Path>) -> Result<ExportReport> {
        let raw = scratch.as_ref().join("export.sql");
        let mut call = connection_args(Call::new(DUMP_PROGRAM), self.settings)
            .args(["--single-transaction", "--no-tablespaces"]);
        for table in &self.settings.exclude_tables {
            call = call.arg(format!("--ignore-table={}.{table}", self.settings.name));
        }
        let call = call.arg(&self.settings.name).stdout_file(&raw);

        info!("export database {:?}", self.settings.name);
        let output = self.syscall.call(&call)?;
        if !output.success() {
            let _ = remove_file(&raw);
            return Err(DatabaseError::ExportFailed {
                exit_code: output.code,
                stderr_excerpt: output.stderr_excerpt(),
            });
        }

        let mut report = ExportReport::default();
        if !output.stderr.trim().is_empty() {
            warn!("{DUMP_PROGRAM} reported: {}", output.stderr_excerpt());
            report.warnings = Some(output.stderr);
        }

        compress(&raw, dest.as_ref())?;
        remove_file(&raw).map_err(|err| DatabaseError::Io {
            source: err,
            path: raw.clone(),
        })?;
        debug!("wrote dump {:?}", dest.as_ref().display());

        Ok(report)
    }
}

/// Import database through restore client.
#[derive(Debug)]
pub struct DatabaseImporter<'a, S: Syscall> {
    syscall: &'a S,
    settings: &'a DatabaseSettings,
}

impl<'a, S: Syscall> DatabaseImporter<'a, S> {
    /// Construct new importer.
    pub fn new(syscall: &'a S, settings: &'a DatabaseSettings) -> Self {
        Self { syscall, settings }
    }

    /// Replace database with contents of dump.
    ///
    /// Dumps ending in `.gz` are decompressed into `scratch` before being
    /// streamed into the restore client.
    ///
    /// # Errors
    ///
    /// - Return [`DatabaseError::CreateFailed`] if database cannot be created.
    /// - Return [`DatabaseError::ImportFailed`] if the dump cannot be loaded,
    ///   or tables cannot be counted.
    /// - Return [`DatabaseError::Io`] if dump cannot be decompressed.
    #[instrument(skip(self, dump, scratch), level = "debug")]
    pub fn import(&self, dump: impl AsRef<Path>, scratch: impl AsRef<Path>) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let name = &self.settings.name;
        info!("import {:?} into database {name:?}", dump.as_ref().display());

        debug!("import {}", ImportStage::Preparing);
        let wipe = self.client().arg("-e").arg(format!(
            "DROP DATABASE IF EXISTS {}",
            quote_identifier(name)
        ));
        let output = self.syscall.call(&wipe)?;
        if !output.success() {
            let message = format!("failed to drop database {name:?}: {}", output.stderr_excerpt());
            warn!("{message}");
            report.warnings.push(message);
        }

        let create = self
            .client()
            .arg("-e")
            .arg(format!("CREATE DATABASE {}", quote_identifier(name)));
        let output = self.syscall.call(&create)?;
        if !output.success() {
            return Err(DatabaseError::CreateFailed {
                database: name.clone(),
                exit_code: output.code,
                stderr_excerpt: output.stderr_excerpt(),
            });
        }

        let dump = dump.as_ref();
        let (source, temporary) = if dump.extension().is_some_and(|ext| ext == "gz") {
            let raw = scratch.as_ref().join("import.sql");
            decompress(dump, &raw)?;
            (raw, true)
        } else {
            (dump.to_path_buf(), false)
        };

        let load = self.client().arg(name).stdin_file(&source);
        let loaded = self.checked(ImportStage::Importing, &load);
        if temporary {
            let _ = remove_file(&source);
        }
        loaded?;

        let count = self.client().args(["-N", "-B", "-e"]).arg(format!(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = {}",
            quote_literal(name)
        ));
        let output = self.checked(ImportStage::Verifying, &count)?;
        report.tables = output
            .stdout
            .trim()
            .parse()
            .map_err(|_| DatabaseError::ImportFailed {
                stage: ImportStage::Verifying,
                exit_code: output.code,
                stderr_excerpt: format!("unexpected table count {:?}", output.stdout),
            })?;

        if report.tables == 0 {
            let message = format!(
                "database {name:?} has no tables after import, dump is likely empty or corrupt"
            );
            warn!("{message}");
            report.warnings.push(message);
        } else {
            info!("database {name:?} holds {} tables", report.tables);
        }
        debug!("import {}", ImportStage::Done);

        Ok(report)
    }

    fn client(&self) -> Call {
        connection_args(Call::new(CLIENT_PROGRAM), self.settings)
    }

    fn checked(&self, stage: ImportStage, call: &Call) -> Result<CallOutput> {
        debug!("import {stage}");
        let output = self.syscall.call(call)?;
        if !output.success() {
            return Err(DatabaseError::ImportFailed {
                stage,
                exit_code: output.code,
                stderr_excerpt: output.stderr_excerpt(),
            });
        }

        Ok(output)
    }
}

// INVARIANT: Password goes through the environment, never the command line.
fn connection_args(call: Call, settings: &DatabaseSettings) -> Call {
    let call = call.args([
        format!("--host={}", settings.host),
        format!("--port={}", settings.port),
        format!("--user={}", settings.user),
    ]);

    if settings.password.is_empty() {
        call
    } else {
        call.env("MYSQL_PWD", &settings.password)
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn compress(source: &Path, dest: &Path) -> Result<()> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |err| DatabaseError::Io { source: err, path }
    };

    let mut reader = BufReader::new(File::open(source).map_err(io_error(source))?);
    let writer = BufWriter::new(File::create(dest).map_err(io_error(dest))?);
    let mut encoder = GzEncoder::new(writer, Compression::default());
    copy(&mut reader, &mut encoder).map_err(io_error(dest))?;
    encoder
        .finish()
        .map_err(io_error(dest))?
        .flush()
        .map_err(io_error(dest))?;

    Ok(())
}

fn decompress(source: &Path, dest: &Path) -> Result<()> {
    let io_error = |path: &Path| {
        let path = path.to_path_buf();
        move |err| DatabaseError::Io { source: err, path }
    };

    let mut decoder = GzDecoder::new(BufReader::new(
        File::open(source).map_err(io_error(source))?,
    ));
    let mut writer = BufWriter::new(File::create(dest).map_err(io_error(dest))?);
    copy(&mut decoder, &mut writer).map_err(io_error(source))?;
    writer.flush().map_err(io_error(dest))?;

    Ok(())
}

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Dump client exited with failure.
    #[error("database export failed with exit code {exit_code:?}:\n{stderr_excerpt}")]
    ExportFailed {
        exit_code: Option<i32>,
        stderr_excerpt: String,
    },

    /// Target database cannot be recreated.
    #[error("failed to create database {database:?} with exit code {exit_code:?}:\n{stderr_excerpt}")]
    CreateFailed {
        database: String,
        exit_code: Option<i32>,
        stderr_excerpt: String,
    },

    /// Restore client failed in given stage.
    #[error("database import failed while {stage} with exit code {exit_code:?}:\n{stderr_excerpt}")]
    ImportFailed {
        stage: ImportStage,
        exit_code: Option<i32>,
        stderr_excerpt: String,
    },

    /// Dump file cannot be read or written.
    #[error("failed to process dump file {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Client program could not be run.
    #[error(transparent)]
    Syscall(#[from] SyscallError),
}

/// Friendly result alias :3
pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;
