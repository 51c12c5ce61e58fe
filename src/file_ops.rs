//! File-level operations
//!
//! Reading containers, replacing them atomically, keeping backups of the
//! previous version, and the stand-alone encrypt/decrypt mode that seals an
//! arbitrary byte blob as a header followed by a single field.

use crate::config::{BackupConfig, BackupMode};
use crate::container::{HEADER_LEN, Header};
use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::field::{self, FieldReader};
use crate::passphrase::PassphraseReader;
use crate::secure::SecureBuffer;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const BACKUP_EXTENSION: &str = "ibak";

/// Read a whole file. A missing or unreadable path is `CannotOpen`.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| read_error(path, e))
}

/// Replace `path` with `contents` atomically (tempfile + fsync + rename).
///
/// Either the old file or the new file exists afterwards, never a partial
/// one. The result has mode 0o600 on Unix systems.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        VaultError::cannot_write(format!("failed to create tempfile in {}", dir.display()), e)
    })?;

    temp_file
        .write_all(contents)
        .map_err(|e| VaultError::cannot_write("failed to write to tempfile", e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| VaultError::cannot_write("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| VaultError::cannot_write("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| VaultError::cannot_write("failed to get tempfile metadata", e))?
            .permissions();
        perms.set_mode(0o600);
        temp_file
            .as_file()
            .set_permissions(perms)
            .map_err(|e| VaultError::cannot_write("failed to set tempfile permissions", e))?;
    }

    temp_file.persist(path).map_err(|e| {
        VaultError::cannot_write(
            format!("failed to rename to target file {}", path.display()),
            e.error,
        )
    })?;
    Ok(())
}

/// Seal `plaintext` under `passphrase`: a fresh header and one field.
pub fn seal(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let header = Header::generate(passphrase)?;
    let cipher = header.cipher(passphrase)?;
    let mut out = header.to_bytes().to_vec();
    field::write(&cipher, plaintext, &mut out)?;
    Ok(out)
}

/// Inverse of [`seal`].
pub fn unseal(passphrase: &[u8], data: &[u8]) -> Result<SecureBuffer> {
    let header = Header::parse(data)?;
    if !header.verify(passphrase)? {
        return Err(VaultError::wrong_passphrase());
    }
    let cipher = header.cipher(passphrase)?;
    let mut reader = FieldReader::new(&cipher, &data[HEADER_LEN..]);
    let plaintext = reader
        .read()?
        .ok_or_else(|| VaultError::corrupt("encrypted file holds no payload"))?;
    if !reader.is_at_end() {
        return Err(VaultError::corrupt(format!(
            "{} bytes of trailing data after the payload",
            data.len() - HEADER_LEN - reader.position()
        )));
    }
    Ok(plaintext)
}

/// Encrypt a file with a passphrase
///
/// Reads plaintext from `input_path`, encrypts it using a passphrase from
/// `passphrase_reader`, and writes the result to `output_path`.
pub fn encrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let plaintext = SecureBuffer::new(read_file(input_path)?);
    let passphrase = passphrase_reader.read_passphrase("Passphrase: ")?;
    let sealed = seal(passphrase.as_bytes(), plaintext.as_bytes())
        .map_err(|e| e.with_context("encryption failed"))?;
    write_atomic(output_path, &sealed)
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    tracing::debug!(input = %input_path.display(), output = %output_path.display(), "encrypted file");
    Ok(())
}

/// Decrypt a file with a passphrase
///
/// Reads ciphertext from `input_path`, decrypts it using a passphrase from
/// `passphrase_reader`, and writes the plaintext to `output_path`.
pub fn decrypt_file(
    input_path: &Path,
    output_path: &Path,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let sealed = read_file(input_path)?;
    let passphrase = passphrase_reader.read_passphrase("Passphrase: ")?;
    let plaintext = unseal(passphrase.as_bytes(), &sealed)
        .map_err(|e| e.with_context("failed to decrypt"))?;
    write_atomic(output_path, plaintext.as_bytes())
        .map_err(|e| e.with_context(format!("failed to write to {}", output_path.display())))?;
    tracing::debug!(input = %input_path.display(), output = %output_path.display(), "decrypted file");
    Ok(())
}

/// Replace the file at `path` with its sealed form.
pub fn encrypt_file_in_place(path: &Path, passphrase: &[u8]) -> Result<()> {
    let plaintext = SecureBuffer::new(read_file(path)?);
    let sealed = seal(passphrase, plaintext.as_bytes())?;
    write_atomic(path, &sealed)
}

/// Replace the sealed file at `path` with its plaintext.
///
/// A wrong passphrase leaves the file untouched.
pub fn decrypt_file_in_place(path: &Path, passphrase: &[u8]) -> Result<()> {
    let sealed = read_file(path)?;
    let plaintext = unseal(passphrase, &sealed)?;
    write_atomic(path, plaintext.as_bytes())
}

/// Copy the current file at `path` aside before it is overwritten.
///
/// Returns the backup path, or `None` when backups are off or there is
/// nothing to back up yet.
pub fn backup_existing(path: &Path, config: &BackupConfig) -> Result<Option<PathBuf>> {
    if config.mode == BackupMode::None || !path.exists() {
        return Ok(None);
    }

    let dir = match (&config.backup_dir, path.parent()) {
        (Some(dir), _) => dir.clone(),
        (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| io_error(format!("failed to create {}", dir.display()), e))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vault".to_string());

    let target = match config.mode {
        BackupMode::Single => dir.join(format!("{}.{}", stem, BACKUP_EXTENSION)),
        _ => {
            let next = numbered_backups(&dir, &stem)?
                .last()
                .map(|(n, _)| n + 1)
                .unwrap_or(1);
            dir.join(format!("{}_{:03}.{}", stem, next, BACKUP_EXTENSION))
        }
    };

    fs::copy(path, &target).map_err(|e| {
        io_error(
            format!("failed to copy {} to {}", path.display(), target.display()),
            e,
        )
    })?;
    tracing::debug!(backup = %target.display(), "backed up container");

    if config.mode == BackupMode::Incremental {
        prune_backups(&dir, &stem, config.max_backups.max(1))?;
    }
    Ok(Some(target))
}

/// Incremental backups of `stem` in `dir`, oldest first.
fn numbered_backups(dir: &Path, stem: &str) -> Result<Vec<(u32, PathBuf)>> {
    let prefix = format!("{}_", stem);
    let suffix = format!(".{}", BACKUP_EXTENSION);
    let entries =
        fs::read_dir(dir).map_err(|e| io_error(format!("failed to list {}", dir.display()), e))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_error(format!("failed to list {}", dir.display()), e))?;
        let name = entry.file_name();
        let Some(number) = name
            .to_str()
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|n| n.strip_suffix(&suffix))
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        found.push((number, entry.path()));
    }
    found.sort();
    Ok(found)
}

fn prune_backups(dir: &Path, stem: &str, keep: usize) -> Result<()> {
    let backups = numbered_backups(dir, stem)?;
    let excess = backups.len().saturating_sub(keep);
    for (_, old) in backups.iter().take(excess) {
        if let Err(e) = fs::remove_file(old) {
            tracing::warn!(backup = %old.display(), error = %e, "failed to remove old backup");
        }
    }
    Ok(())
}

fn io_error(msg: String, err: io::Error) -> VaultError {
    VaultError::with_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
}

fn read_error(path: &Path, err: io::Error) -> VaultError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    VaultError::with_source(
        category,
        ErrorKind::CannotOpen,
        format!("failed to read from {}", path.display()),
        err,
    )
}
