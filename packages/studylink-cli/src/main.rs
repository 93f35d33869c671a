//! StudyLink CLI
//!
//! Drives the friend-relationship protocol against a local SQLite document
//! store. Every command acts as the user named by `--as`.
//!
//! ```bash
//! studylink register --user alice --email alice@uni.edu
//! studylink search --as bob ali
//! studylink send --as alice bob
//! studylink pending --as bob
//! studylink accept --as bob alice_bob_1718000000000
//! studylink remove --as alice bob
//! studylink audit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use studylink_core::friends::ConsistencyAuditor;
use studylink_core::{
    ConfirmChoice, ConfirmPrompt, Confirmation, CoreConfig, DirectoryService, DocumentStore,
    Error, Notice, RelationshipService, RemoveOutcome, RequestId, SqliteStore, WriteMode,
};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "studylink", version, about = "StudyLink friend management")]
struct Args {
    /// Path to the SQLite document store
    #[arg(long, env = "STUDYLINK_DB")]
    db: Option<PathBuf>,

    /// Submit both writes of each operation as one batch
    #[arg(long, env = "STUDYLINK_ATOMIC")]
    atomic: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user profile (username is the email's local part)
    Register {
        #[arg(long)]
        user: String,
        #[arg(long)]
        email: String,
    },
    /// Change your username
    Rename {
        #[arg(long = "as")]
        actor: String,
        username: String,
    },
    /// Search users by username or email prefix
    Search {
        #[arg(long = "as")]
        actor: String,
        query: String,
    },
    /// Send a friend request
    Send {
        #[arg(long = "as")]
        actor: String,
        to: String,
    },
    /// Requests waiting on you
    Pending {
        #[arg(long = "as")]
        actor: String,
    },
    /// Requests you sent
    Sent {
        #[arg(long = "as")]
        actor: String,
    },
    /// Accept a request
    Accept {
        #[arg(long = "as")]
        actor: String,
        request_id: String,
    },
    /// Reject a request (or withdraw one you sent)
    Reject {
        #[arg(long = "as")]
        actor: String,
        request_id: String,
    },
    /// List your friends
    Friends {
        #[arg(long = "as")]
        actor: String,
    },
    /// Remove a friend
    Remove {
        #[arg(long = "as")]
        actor: String,
        friend: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show how two users relate
    Status {
        #[arg(long = "as")]
        actor: String,
        other: String,
    },
    /// Check every relationship record for inconsistencies
    Audit,
    /// Audit and repair inconsistencies
    Repair,
}

// ── Confirmation ──────────────────────────────────────────────────────────────

/// Asks on the terminal; anything but y/yes cancels.
struct TerminalConfirmation;

#[async_trait]
impl Confirmation for TerminalConfirmation {
    async fn confirm(&self, prompt: &ConfirmPrompt) -> ConfirmChoice {
        let mut stdout = tokio::io::stdout();
        let question = format!("{}\n{} [y/N] ", prompt.title, prompt.message);
        if stdout.write_all(question.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            return ConfirmChoice::Cancel;
        }

        let mut answer = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut answer).await {
            Ok(_) if matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") => {
                ConfirmChoice::Confirm
            }
            _ => ConfirmChoice::Cancel,
        }
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studylink=info,studylink_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = CoreConfig::from_env().wrap_err("Invalid STUDYLINK_* environment")?;
    if args.atomic {
        config.write_mode = WriteMode::Atomic;
    }

    let db_path = match args.db.clone().or_else(|| config.database_path.clone().map(PathBuf::from)) {
        Some(path) => path,
        None => default_db_path()?,
    };
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    let db_path = db_path
        .to_str()
        .ok_or_else(|| eyre!("Database path is not valid UTF-8"))?
        .to_string();

    tracing::debug!(db = %db_path, mode = %config.write_mode, "Opening store");

    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(Some(&db_path)).await?);
    let app = App {
        directory: DirectoryService::new(store.clone(), &config),
        service: RelationshipService::new(store.clone(), &config),
        auditor: ConsistencyAuditor::new(store),
        json: args.json,
    };

    match app.run(args.command).await {
        Ok(()) => Ok(()),
        Err(err) => app.fail(err).await,
    }
}

fn default_db_path() -> color_eyre::Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| eyre!("No data directory; pass --db"))?;
    Ok(base.join("studylink").join("studylink.db"))
}

// ── Commands ──────────────────────────────────────────────────────────────────

struct App {
    directory: DirectoryService,
    service: RelationshipService,
    auditor: ConsistencyAuditor,
    json: bool,
}

impl App {
    async fn run(&self, command: Command) -> studylink_core::Result<()> {
        match command {
            Command::Register { user, email } => {
                let profile = self.directory.register_profile(&user, &email).await?;
                self.emit(&profile, || {
                    format!("Registered {} as {}", profile.user_id, profile.username)
                });
            }
            Command::Rename { actor, username } => {
                self.directory.update_username(&actor, &username).await?;
                self.emit(&username, || "Username updated successfully".to_string());
            }
            Command::Search { actor, query } => {
                let results = self.directory.search(&actor, &query).await?;
                self.emit(&results, || {
                    if results.is_empty() {
                        return "No users found".to_string();
                    }
                    results
                        .iter()
                        .map(|p| format!("{:<20} {:<30} {}", p.username, p.email, p.user_id))
                        .collect::<Vec<_>>()
                        .join("\n")
                });
            }
            Command::Send { actor, to } => {
                let id = self.service.send_friend_request(&actor, &to).await?;
                let name = self.directory.display_name(&to, None).await?;
                self.emit(&id, || format!("Friend request sent to {} ({})", name, id));
            }
            Command::Pending { actor } => {
                let requests = self.service.incoming_requests(&actor, &self.directory).await?;
                self.emit(&requests, || {
                    if requests.is_empty() {
                        return "No pending requests".to_string();
                    }
                    requests
                        .iter()
                        .map(|r| format!("{}  from {} <{}>", r.request_id, r.sender.username, r.sender.email))
                        .collect::<Vec<_>>()
                        .join("\n")
                });
            }
            Command::Sent { actor } => {
                let requests = self.service.outgoing_requests(&actor, &self.directory).await?;
                self.emit(&requests, || {
                    if requests.is_empty() {
                        return "No sent requests".to_string();
                    }
                    requests
                        .iter()
                        .map(|r| format!("{}  to {}", r.request_id, r.receiver.username))
                        .collect::<Vec<_>>()
                        .join("\n")
                });
            }
            Command::Accept { actor, request_id } => {
                let request = self
                    .service
                    .accept_request(&actor, &RequestId::new(request_id))
                    .await?;
                let name = self.directory.display_name(&request.sender_id, None).await?;
                self.emit(&request, || format!("You are now friends with {}", name));
            }
            Command::Reject { actor, request_id } => {
                let request = self
                    .service
                    .reject_request(&actor, &RequestId::new(request_id))
                    .await?;
                self.emit(&request, || "Friend request rejected".to_string());
            }
            Command::Friends { actor } => {
                let friends = self.service.friends(&actor, &self.directory).await?;
                self.emit(&friends, || {
                    if friends.is_empty() {
                        return "No friends yet".to_string();
                    }
                    friends
                        .iter()
                        .map(|p| format!("{:<20} {}", p.username, p.email))
                        .collect::<Vec<_>>()
                        .join("\n")
                });
            }
            Command::Remove { actor, friend, yes } => {
                let outcome = if yes {
                    self.service
                        .remove_friend(&actor, &friend, &ConfirmChoice::Confirm)
                        .await?
                } else {
                    self.service
                        .remove_friend(&actor, &friend, &TerminalConfirmation)
                        .await?
                };
                let label = match outcome {
                    RemoveOutcome::Removed => "removed",
                    RemoveOutcome::NotFriends => "notFriends",
                    RemoveOutcome::Cancelled => "cancelled",
                };
                self.emit(&label, || match outcome {
                    RemoveOutcome::Removed => format!("Removed {} from your friends", friend),
                    RemoveOutcome::NotFriends => format!("{} is not your friend", friend),
                    RemoveOutcome::Cancelled => "Cancelled".to_string(),
                });
            }
            Command::Status { actor, other } => {
                let state = self.service.relationship_between(&actor, &other).await?;
                self.emit(&state, || format!("{:?}", state));
            }
            Command::Audit => {
                let report = self.auditor.audit().await?;
                self.emit(&report, || {
                    let mut lines = vec![format!(
                        "Scanned {} records, {} problems",
                        report.records_scanned,
                        report.violations.len()
                    )];
                    lines.extend(report.violations.iter().map(|v| format!("  {:?}", v)));
                    lines.join("\n")
                });
            }
            Command::Repair => {
                let outcome = self.auditor.repair().await?;
                self.emit(&outcome, || {
                    let mut lines: Vec<String> =
                        outcome.applied.iter().map(|d| format!("Repaired: {}", d)).collect();
                    lines.push(if outcome.after.is_clean() {
                        "All records agree".to_string()
                    } else {
                        format!("{} problems remain", outcome.after.violations.len())
                    });
                    lines.join("\n")
                });
            }
        }
        Ok(())
    }

    /// Print `value` as JSON, or the human text.
    fn emit<T, F>(&self, value: &T, text: F)
    where
        T: Serialize,
        F: FnOnce() -> String,
    {
        if self.json {
            match serde_json::to_string_pretty(value) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::error!("Failed to encode output: {}", e),
            }
        } else {
            println!("{}", text());
        }
    }

    /// Show the error as a notice; replay the missing half of a partial write once.
    async fn fail(&self, err: Error) -> color_eyre::Result<()> {
        let notice = Notice::from(&err);
        if self.json {
            eprintln!(
                "{}",
                serde_json::json!({
                    "code": notice.code,
                    "title": notice.title,
                    "message": notice.message,
                    "recoverable": notice.recoverable,
                })
            );
        } else {
            eprintln!("{}: {}", notice.title, notice.message);
        }

        if let Some(repair) = err.repair() {
            match self.service.retry_repair(repair).await {
                Ok(()) => {
                    eprintln!("Retried the missing write: {}", repair.description);
                    return Ok(());
                }
                Err(retry) => {
                    tracing::warn!("Retry failed: {}", retry);
                    eprintln!("Run `studylink repair` once the store is reachable.");
                }
            }
        }

        Err(eyre!("error {}", notice.code))
    }
}
