//! On-disk container: header plus a sequence of encrypted records
//!
//! ```text
//! [8]  verification nonce
//! [20] verification tag   = H(passphrase, nonce)
//! [20] key-derivation salt
//! [8]  chain IV
//! repeat until EOF, 7 fields per record:
//!   group, title, user, password, notes, created, modified
//! ```
//!
//! Every field is encoded by [`crate::field`]. A file that ends on a record
//! boundary is complete; one that ends inside a record is corrupt.
//!
//! A [`Container`] is only ever constructed in the open state. It moves to
//! the closed state after a failed write whose rollback also failed, and
//! every later operation on it reports an error until the caller reopens
//! the path.

use crate::cipher::{ChainedCipher, IV_LEN, SALT_LEN};
use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::field::{self, FieldReader};
use crate::file_ops;
use crate::random;
use crate::record::Entry;
use crate::secure::SecureBuffer;
use crate::verifier::{self, NONCE_LEN, TAG_LEN, Verification};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Total header size in bytes
pub const HEADER_LEN: usize = NONCE_LEN + TAG_LEN + SALT_LEN + IV_LEN;

/// Number of fields making up one record
pub const FIELDS_PER_RECORD: usize = 7;

const TIMESTAMP_LEN: usize = 8;

/// Container header. Holds no secret: the tag is one-way and the salt and
/// IV are public inputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub verification: Verification,
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
}

impl Header {
    /// Fresh nonce, tag, salt and IV for `passphrase`.
    pub fn generate(passphrase: &[u8]) -> Result<Self> {
        Ok(Self {
            verification: verifier::generate(passphrase)?,
            salt: random::array::<SALT_LEN>(),
            iv: random::array::<IV_LEN>(),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let (nonce, rest) = out.split_at_mut(NONCE_LEN);
        let (tag, rest) = rest.split_at_mut(TAG_LEN);
        let (salt, iv) = rest.split_at_mut(SALT_LEN);
        nonce.copy_from_slice(&self.verification.nonce);
        tag.copy_from_slice(&self.verification.tag);
        salt.copy_from_slice(&self.salt);
        iv.copy_from_slice(&self.iv);
        out
    }

    /// Parse the header at the start of `data`.
    ///
    /// An empty input, or a header whose nonce and tag are all zero, is
    /// `NoContainer`: the file exists but no database was ever written to it.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(no_container("file is empty"));
        }
        if data.len() < HEADER_LEN {
            return Err(VaultError::corrupt(format!(
                "header truncated: {} of {} bytes",
                data.len(),
                HEADER_LEN
            )));
        }

        let mut verification = Verification {
            nonce: [0u8; NONCE_LEN],
            tag: [0u8; TAG_LEN],
        };
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];

        let (nonce_bytes, rest) = data[..HEADER_LEN].split_at(NONCE_LEN);
        let (tag_bytes, rest) = rest.split_at(TAG_LEN);
        let (salt_bytes, iv_bytes) = rest.split_at(SALT_LEN);
        verification.nonce.copy_from_slice(nonce_bytes);
        verification.tag.copy_from_slice(tag_bytes);
        salt.copy_from_slice(salt_bytes);
        iv.copy_from_slice(iv_bytes);

        if verification.nonce.iter().chain(verification.tag.iter()).all(|&b| b == 0) {
            return Err(no_container("verification header is all zero"));
        }

        Ok(Self {
            verification,
            salt,
            iv,
        })
    }

    /// True when `passphrase` matches the stored tag.
    pub fn verify(&self, passphrase: &[u8]) -> Result<bool> {
        verifier::verify(passphrase, &self.verification.nonce, &self.verification.tag)
    }

    /// Derive the record cipher for `passphrase`.
    pub fn cipher(&self, passphrase: &[u8]) -> Result<ChainedCipher> {
        ChainedCipher::new(passphrase, &self.salt, self.iv)
    }
}

fn no_container(msg: &str) -> VaultError {
    VaultError::new(ErrorCategory::User, ErrorKind::NoContainer, format!("no container: {}", msg))
}

fn encode_timestamp(at: Option<OffsetDateTime>) -> Vec<u8> {
    match at {
        Some(t) => t.unix_timestamp().to_le_bytes().to_vec(),
        None => Vec::new(),
    }
}

fn decode_timestamp(field: &SecureBuffer, name: &str) -> Result<Option<OffsetDateTime>> {
    match field.len() {
        0 => Ok(None),
        TIMESTAMP_LEN => {
            let mut raw = [0u8; TIMESTAMP_LEN];
            raw.copy_from_slice(field.as_bytes());
            OffsetDateTime::from_unix_timestamp(i64::from_le_bytes(raw))
                .map(Some)
                .map_err(|e| {
                    VaultError::with_source(
                        ErrorCategory::User,
                        ErrorKind::CorruptContainer,
                        format!("{} timestamp out of range", name),
                        e,
                    )
                })
        }
        n => Err(VaultError::corrupt(format!(
            "{} timestamp field has {} bytes, expected 0 or {}",
            name, n, TIMESTAMP_LEN
        ))),
    }
}

fn decode_text(field: &SecureBuffer, name: &str) -> Result<String> {
    field
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| VaultError::corrupt(format!("{} field is not valid UTF-8", name)))
}

/// Append the seven fields of `entry` to `out`.
pub(crate) fn encode_record(cipher: &ChainedCipher, entry: &Entry, out: &mut Vec<u8>) -> Result<()> {
    field::write(cipher, entry.group.as_bytes(), out)?;
    field::write(cipher, entry.title.as_bytes(), out)?;
    field::write(cipher, entry.user.as_bytes(), out)?;
    field::write(cipher, entry.password.as_bytes(), out)?;
    field::write(cipher, entry.notes.as_bytes(), out)?;
    field::write(cipher, &encode_timestamp(entry.created()), out)?;
    field::write(cipher, &encode_timestamp(entry.modified()), out)?;
    Ok(())
}

fn encode_records(cipher: &ChainedCipher, records: &[Entry], out: &mut Vec<u8>) -> Result<()> {
    for entry in records {
        encode_record(cipher, entry, out)?;
    }
    Ok(())
}

/// Decode every record in `body` (the bytes after the header).
pub(crate) fn decode_records(cipher: &ChainedCipher, body: &[u8]) -> Result<Vec<Entry>> {
    let mut reader = FieldReader::new(cipher, body);
    let mut records = Vec::new();

    while let Some(group) = reader.read()? {
        let mut next = |name: &str| -> Result<SecureBuffer> {
            reader.read()?.ok_or_else(|| {
                VaultError::corrupt(format!(
                    "record {} ends before its {} field",
                    records.len() + 1,
                    name
                ))
            })
        };
        let title = next("title")?;
        let user = next("user")?;
        let password = next("password")?;
        let notes = next("notes")?;
        let created = next("created")?;
        let modified = next("modified")?;

        let mut entry = Entry::new(
            decode_text(&group, "group")?,
            decode_text(&title, "title")?,
            decode_text(&user, "user")?,
            password,
            decode_text(&notes, "notes")?,
        );
        entry.set_created(decode_timestamp(&created, "created")?);
        entry.set_modified(decode_timestamp(&modified, "modified")?);
        records.push(entry);
    }

    Ok(records)
}

/// An open container file.
pub struct Container {
    path: PathBuf,
    header: Header,
    cipher: ChainedCipher,
    closed: bool,
}

impl Container {
    /// Write a new, empty container to `path`, replacing any file there.
    pub fn create(path: &Path, passphrase: &[u8]) -> Result<Self> {
        let header = Header::generate(passphrase)?;
        let cipher = header.cipher(passphrase)?;
        file_ops::write_atomic(path, &header.to_bytes())
            .map_err(|e| e.with_context(format!("failed to create {}", path.display())))?;
        tracing::info!(path = %path.display(), "created container");
        Ok(Self {
            path: path.to_path_buf(),
            header,
            cipher,
            closed: false,
        })
    }

    /// Open `path` and verify `passphrase` against its header.
    ///
    /// No record is decrypted here; see [`Container::read_all_records`].
    pub fn open(path: &Path, passphrase: &[u8]) -> Result<Self> {
        let data = file_ops::read_file(path)?;
        let header = Header::parse(&data)?;
        if !header.verify(passphrase)? {
            tracing::debug!(path = %path.display(), "passphrase rejected");
            return Err(VaultError::wrong_passphrase());
        }
        let cipher = header.cipher(passphrase)?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "opened container");
        Ok(Self {
            path: path.to_path_buf(),
            header,
            cipher,
            closed: false,
        })
    }

    /// Check `passphrase` against the container at `path` without decrypting
    /// any record. A mismatch is `Ok(false)`.
    pub fn check_passphrase(path: &Path, passphrase: &[u8]) -> Result<bool> {
        let data = file_ops::read_file(path)?;
        Header::parse(&data)?.verify(passphrase)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Put the container in the state a failed append rollback leaves.
    #[cfg(test)]
    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// True when `passphrase` is the one this container is keyed with.
    pub fn verify(&self, passphrase: &[u8]) -> Result<bool> {
        self.header.verify(passphrase)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(VaultError::new(
                ErrorCategory::User,
                ErrorKind::CannotWrite,
                format!(
                    "{} was left in an unknown state by a failed write; reopen it to retry",
                    self.path.display()
                ),
            ));
        }
        Ok(())
    }

    /// Decrypt every record currently on disk, in file order.
    pub fn read_all_records(&self) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        let data = file_ops::read_file(&self.path)?;
        let header = Header::parse(&data)?;
        if header != self.header {
            return Err(VaultError::corrupt(format!(
                "header of {} changed since it was opened",
                self.path.display()
            )));
        }
        let records = decode_records(&self.cipher, &data[HEADER_LEN..])
            .map_err(|e| e.with_context(format!("failed to read records from {}", self.path.display())))?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "read records");
        Ok(records)
    }

    fn serialize(header: &Header, cipher: &ChainedCipher, records: &[Entry]) -> Result<Vec<u8>> {
        let mut out = header.to_bytes().to_vec();
        encode_records(cipher, records, &mut out)?;
        Ok(out)
    }

    /// Replace the file with the header and `records`.
    ///
    /// The write goes to a temporary file that is renamed over the target,
    /// so a failure leaves the previous content in place.
    pub fn write_all_records(&mut self, records: &[Entry]) -> Result<()> {
        self.ensure_open()?;
        let data = Self::serialize(&self.header, &self.cipher, records)?;
        file_ops::write_atomic(&self.path, &data)?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "rewrote container");
        Ok(())
    }

    /// Write `records` under the current key to `path` and continue there.
    pub fn save_as(&mut self, path: &Path, records: &[Entry]) -> Result<()> {
        self.ensure_open()?;
        let data = Self::serialize(&self.header, &self.cipher, records)?;
        file_ops::write_atomic(path, &data)?;
        tracing::info!(from = %self.path.display(), to = %path.display(), "saved container under new name");
        self.path = path.to_path_buf();
        Ok(())
    }

    /// Append `records` after the last record on disk.
    ///
    /// The result reads back exactly as a full rewrite would. If the append
    /// fails the file is truncated back to its previous length; if that
    /// also fails the container is closed.
    pub fn append_records(&mut self, records: &[Entry]) -> Result<()> {
        self.ensure_open()?;
        if records.is_empty() {
            return Ok(());
        }
        let mut data = Vec::new();
        encode_records(&self.cipher, records, &mut data)?;

        let mut file = OpenOptions::new().append(true).open(&self.path).map_err(|e| {
            VaultError::cannot_write(format!("failed to open {} for append", self.path.display()), e)
        })?;
        let original_len = file
            .metadata()
            .map_err(|e| VaultError::cannot_write("failed to stat container", e))?
            .len();
        if original_len < HEADER_LEN as u64 {
            return Err(VaultError::corrupt(format!(
                "{} is shorter than a header",
                self.path.display()
            )));
        }

        if let Err(e) = file.write_all(&data).and_then(|()| file.sync_all()) {
            if let Err(rollback) = truncate(&file, original_len) {
                self.closed = true;
                tracing::warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "rollback after failed append failed, closing container"
                );
            }
            return Err(VaultError::cannot_write(
                format!("failed to append to {}", self.path.display()),
                e,
            ));
        }

        tracing::debug!(path = %self.path.display(), records = records.len(), "appended records");
        Ok(())
    }

    /// Re-key the container: fresh header secrets, a new cipher, and one
    /// atomic rewrite of `records` under it.
    ///
    /// Nothing changes, on disk or in memory, unless the rewrite succeeds.
    pub fn change_passphrase(&mut self, new_passphrase: &[u8], records: &[Entry]) -> Result<()> {
        self.ensure_open()?;
        let header = Header::generate(new_passphrase)?;
        let cipher = header.cipher(new_passphrase)?;
        let data = Self::serialize(&header, &cipher, records)?;
        file_ops::write_atomic(&self.path, &data)?;

        self.header = header;
        self.cipher = cipher;
        tracing::info!(path = %self.path.display(), records = records.len(), "changed passphrase");
        Ok(())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("path", &self.path)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn truncate(file: &File, len: u64) -> std::io::Result<()> {
    file.set_len(len)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::BLOCK_LEN;
    use crate::kdf::KEY_LEN;
    use std::fs;
    use tempfile::TempDir;

    fn fast_cipher() -> ChainedCipher {
        let key = SecureBuffer::from_slice(&[0x5au8; KEY_LEN]);
        ChainedCipher::with_key(&key, [0x33u8; IV_LEN]).unwrap()
    }

    fn sample() -> Vec<Entry> {
        let t = OffsetDateTime::from_unix_timestamp(1_650_000_000).unwrap();
        vec![
            Entry::new("Work", "git", "alice", "s3cr3t", ""),
            Entry::new("", "bank", "bob", "pa55 word", "pin is elsewhere\nsecond line")
                .with_created(t)
                .with_modified(t),
            Entry::new("Ünïcode", "ключ", "用户", "", ""),
        ]
    }

    #[test]
    fn test_header_layout() {
        let header = Header {
            verification: Verification {
                nonce: [1u8; NONCE_LEN],
                tag: [2u8; TAG_LEN],
            },
            salt: [3u8; SALT_LEN],
            iv: [4u8; IV_LEN],
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 56);
        assert_eq!(&bytes[..8], &[1u8; 8]);
        assert_eq!(&bytes[8..28], &[2u8; 20]);
        assert_eq!(&bytes[28..48], &[3u8; 20]);
        assert_eq!(&bytes[48..], &[4u8; 8]);
        assert_eq!(Header::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_parse_empty_is_no_container() {
        assert_eq!(Header::parse(&[]).unwrap_err().kind, ErrorKind::NoContainer);
    }

    #[test]
    fn test_parse_zero_verification_is_no_container() {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[40] = 9; // salt is not part of the check
        assert_eq!(Header::parse(&bytes).unwrap_err().kind, ErrorKind::NoContainer);
    }

    #[test]
    fn test_parse_short_header_is_corrupt() {
        let err = Header::parse(&[1u8; HEADER_LEN - 1]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptContainer);
    }

    #[test]
    fn test_records_roundtrip() {
        let cipher = fast_cipher();
        let records = sample();
        let mut body = Vec::new();
        encode_records(&cipher, &records, &mut body).unwrap();
        assert_eq!(decode_records(&cipher, &body).unwrap(), records);
    }

    #[test]
    fn test_empty_body_has_no_records() {
        assert!(decode_records(&fast_cipher(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_partial_record_is_corrupt() {
        let cipher = fast_cipher();
        let mut body = Vec::new();
        encode_records(&cipher, &sample()[..1], &mut body).unwrap();
        // the empty timestamp fields are one block each; drop both
        body.truncate(body.len() - 2 * BLOCK_LEN);

        let err = decode_records(&cipher, &body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptContainer);
    }

    #[test]
    fn test_bad_timestamp_length_is_corrupt() {
        let cipher = fast_cipher();
        let mut body = Vec::new();
        for f in [&b"g"[..], b"t", b"u", b"p", b"n", b"abc", b""] {
            field::write(&cipher, f, &mut body).unwrap();
        }
        let err = decode_records(&cipher, &body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptContainer);
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let cipher = fast_cipher();
        let mut body = Vec::new();
        for f in [&[0xffu8, 0xfe][..], b"t", b"u", b"p", b"n", b"", b""] {
            field::write(&cipher, f, &mut body).unwrap();
        }
        let err = decode_records(&cipher, &body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptContainer);
    }

    #[test]
    fn test_create_open_write_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.pwv");

        let mut container = Container::create(&path, b"pw").unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), HEADER_LEN);
        assert!(container.read_all_records().unwrap().is_empty());

        container.write_all_records(&sample()).unwrap();
        let reopened = Container::open(&path, b"pw").unwrap();
        assert_eq!(reopened.read_all_records().unwrap(), sample());
    }

    #[test]
    fn test_open_wrong_passphrase() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.pwv");
        Container::create(&path, b"right").unwrap();

        let err = Container::open(&path, b"wrong").unwrap_err();
        assert_eq!(err.kind, ErrorKind::WrongPassphrase);
        assert!(Container::check_passphrase(&path, b"right").unwrap());
        assert!(!Container::check_passphrase(&path, b"wrong").unwrap());
    }

    #[test]
    fn test_open_missing_is_cannot_open() {
        let dir = TempDir::new().unwrap();
        let err = Container::open(&dir.path().join("absent"), b"pw").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CannotOpen);
    }

    #[test]
    fn test_open_empty_file_is_no_container() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();
        let err = Container::open(&path, b"pw").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoContainer);
    }

    #[test]
    fn test_append_reads_like_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.pwv");
        let records = sample();

        let mut container = Container::create(&path, b"pw").unwrap();
        container.write_all_records(&records[..1]).unwrap();
        container.append_records(&records[1..]).unwrap();

        assert_eq!(container.read_all_records().unwrap(), records);
    }

    #[test]
    fn test_change_passphrase_rekeys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.pwv");
        let mut container = Container::create(&path, b"old").unwrap();
        container.write_all_records(&sample()).unwrap();
        let old_header = container.header().clone();

        container.change_passphrase(b"new", &sample()).unwrap();
        assert_ne!(container.header().salt, old_header.salt);
        assert!(container.verify(b"new").unwrap());

        assert_eq!(
            Container::open(&path, b"old").unwrap_err().kind,
            ErrorKind::WrongPassphrase
        );
        let reopened = Container::open(&path, b"new").unwrap();
        assert_eq!(reopened.read_all_records().unwrap(), sample());
    }

    #[test]
    fn test_failed_rewrite_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.pwv");
        let mut container = Container::create(&path, b"pw").unwrap();
        container.write_all_records(&sample()).unwrap();
        let before = fs::read(&path).unwrap();

        let missing = dir.path().join("no-such-dir").join("vault.pwv");
        let err = container.save_as(&missing, &sample()[..1]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CannotWrite);
        assert_eq!(container.path(), path.as_path());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_closed_container_rejects_every_operation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.pwv");
        let other = dir.path().join("other.pwv");
        let mut container = Container::create(&path, b"pw").unwrap();
        container.write_all_records(&sample()).unwrap();
        let before = fs::read(&path).unwrap();

        container.mark_closed();
        assert!(container.is_closed());

        let errors = [
            container.read_all_records().map(|_| ()).unwrap_err(),
            container.write_all_records(&sample()[..1]).unwrap_err(),
            container.append_records(&sample()[..1]).unwrap_err(),
            container.save_as(&other, &sample()).unwrap_err(),
            container.change_passphrase(b"new", &sample()).unwrap_err(),
        ];
        for err in &errors {
            assert_eq!(err.kind, ErrorKind::CannotWrite);
            assert!(err.message().contains("reopen it to retry"));
        }

        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!other.exists());
        assert_eq!(container.path(), path.as_path());
        assert!(container.verify(b"pw").unwrap());

        let reopened = Container::open(&path, b"pw").unwrap();
        assert!(!reopened.is_closed());
        assert_eq!(reopened.read_all_records().unwrap(), sample());
    }

    #[test]
    fn test_truncate_restores_previous_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.pwv");
        let mut container = Container::create(&path, b"pw").unwrap();
        container.write_all_records(&sample()[..1]).unwrap();
        let before = fs::read(&path).unwrap();

        let file = OpenOptions::new().append(true).open(&path).unwrap();
        (&file).write_all(&[0xa5u8; 3 * BLOCK_LEN + 1]).unwrap();
        assert_eq!(
            container.read_all_records().unwrap_err().kind,
            ErrorKind::CorruptContainer
        );

        truncate(&file, before.len() as u64).unwrap();
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(container.read_all_records().unwrap(), sample()[..1]);
    }
}
