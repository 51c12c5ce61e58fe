//! pwvault CLI - password database in a passphrase-encrypted container
//!
//! Every command that touches a database asks for the master passphrase
//! first. With `--passphrase-stdin` each secret is read as one line of
//! stdin, in the order the command asks for them.

use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use pwvault::container::Container;
use pwvault::error::{ErrorCategory, ErrorKind, Result, VaultError};
use pwvault::file_ops;
use pwvault::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};
use pwvault::{CharClass, DatabaseSession, Entry, EntryKey, PasswordPolicy, VaultConfig};

#[derive(Parser)]
#[command(name = "pwvault")]
#[command(version)]
#[command(about = "Passphrase-protected password database.", long_about = None)]
struct Cli {
    /// Read passphrases from stdin, one per line, instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// JSON file with backup and save options
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DbArgs {
    /// Path to the database file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,
}

#[derive(Args)]
struct KeyArgs {
    /// Group the entry belongs to
    #[arg(short, long, default_value = "")]
    group: String,

    /// Entry title
    #[arg(short, long)]
    title: String,

    /// User name
    #[arg(short, long, default_value = "")]
    user: String,
}

impl KeyArgs {
    fn key(&self) -> EntryKey {
        EntryKey::new(self.group.as_str(), self.title.as_str(), self.user.as_str())
    }
}

#[derive(Args)]
struct GenArgs {
    /// Length of generated passwords
    #[arg(short = 'l', long, default_value_t = 16)]
    length: usize,

    /// Leave symbols out of generated passwords
    #[arg(long)]
    no_symbols: bool,

    /// Leave out characters that are easily confused, like l, 1, O and 0
    #[arg(long)]
    easy_vision: bool,
}

impl GenArgs {
    fn policy(&self) -> PasswordPolicy {
        let mut classes = vec![CharClass::Lowercase, CharClass::Uppercase, CharClass::Digit];
        if !self.no_symbols {
            classes.push(CharClass::Symbol);
        }
        PasswordPolicy {
            length: self.length,
            classes,
            easy_vision: self.easy_vision,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty database
    Init {
        #[command(flatten)]
        db: DbArgs,
    },

    /// List entries
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        db: DbArgs,

        /// Only list entries in this group
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Show one entry
    Show {
        #[command(flatten)]
        db: DbArgs,

        #[command(flatten)]
        key: KeyArgs,

        /// Print the password as well
        #[arg(long)]
        reveal: bool,
    },

    /// Add an entry; its password is read like a passphrase
    Add {
        #[command(flatten)]
        db: DbArgs,

        #[command(flatten)]
        key: KeyArgs,

        /// Free-form notes
        #[arg(short, long, default_value = "")]
        notes: String,

        /// Generate the password instead of reading it
        #[arg(long)]
        generate: bool,

        #[command(flatten)]
        gen_args: GenArgs,
    },

    /// Print a freshly generated password
    #[command(alias = "gen")]
    Generate {
        #[command(flatten)]
        gen_args: GenArgs,
    },

    /// Write every entry, passwords included, to a plaintext file
    Export {
        #[command(flatten)]
        db: DbArgs,

        /// Path to write the tab-separated text to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Add the entries of a plaintext file written by export
    Import {
        #[command(flatten)]
        db: DbArgs,

        /// Path of the tab-separated text to read
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Group to put imported entries under
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Remove an entry
    #[command(alias = "rm")]
    Remove {
        #[command(flatten)]
        db: DbArgs,

        #[command(flatten)]
        key: KeyArgs,
    },

    /// Change the master passphrase
    Passwd {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Check a passphrase against a database without decrypting it
    Check {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Encrypt a file
    #[command(alias = "e")]
    Encrypt {
        /// Path to the file whose contents is to be encrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the encrypted file to; encrypts in place if omitted
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Decrypt a file
    #[command(alias = "d")]
    Decrypt {
        /// Path to the file whose contents is to be decrypted
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the decrypted file to; decrypts in place if omitted
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = std::error::Error::source(cause);
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => VaultConfig::load(path)?,
        None => VaultConfig::default(),
    };
    let mut reader = get_passphrase_reader(cli.passphrase_stdin);
    let reader = &mut *reader;

    match cli.command {
        Commands::Init { db } => init(&db.file, config, reader),
        Commands::List { db, group } => {
            let session = open(&db.file, config, reader)?;
            let entries = session.store().sorted_by(|a, b| a.key().cmp(&b.key()));
            for entry in entries
                .iter()
                .filter(|e| group.as_deref().is_none_or(|g| e.group == g))
            {
                println!("{}", entry.key());
            }
            session.close();
            Ok(())
        }
        Commands::Show { db, key, reveal } => {
            let session = open(&db.file, config, reader)?;
            let key = key.key();
            let entry = session
                .find(&key)
                .ok_or_else(|| VaultError::not_found(format!("no entry {}", key)))?;
            print_entry(entry, reveal);
            session.close();
            Ok(())
        }
        Commands::Add {
            db,
            key,
            notes,
            generate,
            gen_args,
        } => {
            let mut session = open(&db.file, config, reader)?;
            let password = if generate {
                gen_args.policy().generate()?
            } else {
                reader.read_passphrase("Entry password: ")?
            };
            let title = session
                .store()
                .unique_title(&key.group, &key.title, &key.user);
            if title != key.title {
                eprintln!("entry exists, adding as {:?}", title);
            }
            session.add(Entry::new(key.group, title, key.user, password, notes));
            session.save()?;
            session.close();
            Ok(())
        }
        Commands::Generate { gen_args } => {
            let password = gen_args.policy().generate()?;
            println!("{}", String::from_utf8_lossy(password.as_bytes()));
            Ok(())
        }
        Commands::Export { db, output } => {
            let session = open(&db.file, config, reader)?;
            let mut text = Zeroizing::new(Vec::new());
            let count = session.export_text(&mut *text)?;
            file_ops::write_atomic(&output, &text)?;
            eprintln!("exported {} entries to {}", count, output.display());
            session.close();
            Ok(())
        }
        Commands::Import { db, input, prefix } => {
            let mut session = open(&db.file, config, reader)?;
            let text = Zeroizing::new(file_ops::read_file(&input)?);
            let summary = session.import_text(&mut &text[..], &prefix)?;
            session.save()?;
            println!(
                "imported {} entries, skipped {} lines",
                summary.imported, summary.skipped
            );
            session.close();
            Ok(())
        }
        Commands::Remove { db, key } => {
            let mut session = open(&db.file, config, reader)?;
            session.remove(&key.key())?;
            session.save()?;
            session.close();
            Ok(())
        }
        Commands::Passwd { db } => {
            let old = reader.read_passphrase("Current passphrase: ")?;
            let mut session = DatabaseSession::open_with_config(&db.file, old.as_bytes(), config)?;
            let new = read_new_passphrase(reader)?;
            session.change_passphrase(old.as_bytes(), new.as_bytes())?;
            session.close();
            Ok(())
        }
        Commands::Check { db } => {
            let passphrase = reader.read_passphrase("Passphrase: ")?;
            if Container::check_passphrase(&db.file, passphrase.as_bytes())? {
                println!("passphrase ok");
                Ok(())
            } else {
                Err(VaultError::wrong_passphrase())
            }
        }
        Commands::Encrypt { input, output } => match output {
            Some(output) => file_ops::encrypt_file(&input, &output, reader),
            None => {
                let passphrase = reader.read_passphrase("Passphrase: ")?;
                file_ops::encrypt_file_in_place(&input, passphrase.as_bytes())
            }
        },
        Commands::Decrypt { input, output } => match output {
            Some(output) => file_ops::decrypt_file(&input, &output, reader),
            None => {
                let passphrase = reader.read_passphrase("Passphrase: ")?;
                file_ops::decrypt_file_in_place(&input, passphrase.as_bytes())
            }
        },
    }
}

fn init(path: &Path, config: VaultConfig, reader: &mut dyn PassphraseReader) -> Result<()> {
    if path.metadata().is_ok_and(|m| m.len() > 0) {
        return Err(VaultError::new(
            ErrorCategory::User,
            ErrorKind::CannotWrite,
            format!("{} already exists", path.display()),
        ));
    }
    let passphrase = read_new_passphrase(reader)?;
    DatabaseSession::new_database_with_config(path, passphrase.as_bytes(), config)?.close();
    Ok(())
}

fn open(
    path: &Path,
    config: VaultConfig,
    reader: &mut dyn PassphraseReader,
) -> Result<DatabaseSession> {
    let passphrase = reader.read_passphrase("Passphrase: ")?;
    DatabaseSession::open_with_config(path, passphrase.as_bytes(), config)
}

/// Ask for a new passphrase twice and require both to match.
fn read_new_passphrase(reader: &mut dyn PassphraseReader) -> Result<pwvault::SecureBuffer> {
    let first = reader.read_passphrase("New passphrase: ")?;
    let second = reader.read_passphrase("Repeat new passphrase: ")?;
    if first != second {
        return Err(VaultError::new(
            ErrorCategory::User,
            ErrorKind::PassphraseUnavailable,
            "passphrases do not match",
        ));
    }
    Ok(first)
}

fn print_entry(entry: &Entry, reveal: bool) {
    println!("group:    {}", entry.group);
    println!("title:    {}", entry.title);
    println!("user:     {}", entry.user);
    if reveal {
        println!(
            "password: {}",
            String::from_utf8_lossy(entry.password.as_bytes())
        );
    }
    if !entry.notes.is_empty() {
        println!("notes:    {}", entry.notes);
    }
    if let Some(created) = entry.created() {
        println!("created:  {}", created);
    }
    if let Some(modified) = entry.modified() {
        println!("modified: {}", modified);
    }
}

fn get_passphrase_reader(use_stdin: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(io::stdin().lock())))
    } else {
        Box::new(TerminalPassphraseReader)
    }
}
