use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hire::{
    Application, Candidate, Config, Country, Crud, Document, Engine, JobRequisition, SqliteStore,
    Tag,
};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hire")]
#[command(about = "Applicant tracking - countries, candidates, job requisitions and applications")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, env = "HIRE_DB", global = true)]
    db: Option<PathBuf>,

    /// Upper bound on a single store call, in milliseconds
    #[arg(long, env = "HIRE_STORE_TIMEOUT_MS", global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Show cache sizes and refresh times
    Status,

    /// Manage countries
    Country {
        #[command(subcommand)]
        command: CountryCommands,
    },

    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },

    /// Manage candidates
    Candidate {
        #[command(subcommand)]
        command: CandidateCommands,
    },

    /// Manage job requisitions
    Requisition {
        #[command(subcommand)]
        command: RequisitionCommands,
    },

    /// Manage applications
    Application {
        #[command(subcommand)]
        command: RecordCommands,
    },
}

/// Commands shared by every entity. Payloads are JSON; `-` reads stdin.
#[derive(Subcommand)]
enum RecordCommands {
    /// List all records
    List,

    /// Show one record
    Show {
        id: i64,
    },

    /// Create a record (the ID is assigned)
    Add {
        json: String,
    },

    /// Replace a record
    Update {
        id: i64,
        json: String,
    },

    /// Delete a record
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum CountryCommands {
    #[command(flatten)]
    Record(RecordCommands),

    /// List candidates and requisitions located in a country
    Dependents {
        id: i64,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    #[command(flatten)]
    Record(RecordCommands),

    /// Look up a tag by label
    Find {
        label: String,
    },

    /// Map labels to tags, creating the missing ones
    Resolve {
        #[arg(required = true)]
        labels: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CandidateCommands {
    #[command(flatten)]
    Record(RecordCommands),

    /// List a candidate's applications
    Applications {
        id: i64,
    },
}

#[derive(Subcommand)]
enum RequisitionCommands {
    #[command(flatten)]
    Record(RecordCommands),

    /// List requisitions open to applications
    Posted,

    /// List a requisition's applications
    Applications {
        id: i64,
    },
}

// --- Table rendering ---

trait Row {
    const HEADER: &'static str;
    fn row(&self) -> String;
}

impl Row for Country {
    const HEADER: &'static str = "ID     CODE   NAME";
    fn row(&self) -> String {
        format!("{:<6} {:<6} {}", self.id, truncate(&self.code, 6), truncate(&self.name, 40))
    }
}

impl Row for Tag {
    const HEADER: &'static str = "ID     LABEL";
    fn row(&self) -> String {
        format!("{:<6} {}", self.id, truncate(&self.label, 40))
    }
}

impl Row for Candidate {
    const HEADER: &'static str =
        "ID     NAME                      EMAIL                     COUNTRY  APPS  TAGS";
    fn row(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let country = self
            .country
            .as_ref()
            .map(|c| c.code.clone())
            .unwrap_or_else(|| "-".to_string());
        let tags: Vec<&str> = self.tags.iter().map(|t| t.label.as_str()).collect();
        format!(
            "{:<6} {:<25} {:<25} {:<8} {:>4}  {}",
            self.id,
            truncate(&name, 23),
            truncate(&self.email, 23),
            country,
            self.jobs_applied.len(),
            truncate(&tags.join(","), 30)
        )
    }
}

impl Row for JobRequisition {
    const HEADER: &'static str = "ID     POSTED  TITLE                          COUNTRY  APPLICANTS";
    fn row(&self) -> String {
        let country = self
            .country
            .as_ref()
            .map(|c| c.code.clone())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{:<6} {:<7} {:<30} {:<8} {:>10}",
            self.id,
            if self.posting_status { "yes" } else { "no" },
            truncate(&self.title, 28),
            country,
            self.applicants.len()
        )
    }
}

impl Row for Application {
    const HEADER: &'static str = "ID     CANDIDATE  REQUISITION  SALARY       SOURCE";
    fn row(&self) -> String {
        format!(
            "{:<6} {:<10} {:<12} {:<12} {}",
            self.id,
            self.candidate_profile_id,
            self.job_requisition_id,
            truncate(&self.salary_expectation, 10),
            truncate(&self.application_source, 20)
        )
    }
}

fn print_table<T: Row>(rows: &[T]) {
    if rows.is_empty() {
        println!("No records found.");
        return;
    }
    println!("{}", T::HEADER);
    println!("{}", "-".repeat(T::HEADER.len().max(40)));
    for row in rows {
        println!("{}", row.row());
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_payload(arg: &str) -> Result<String> {
    if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        Ok(buf)
    } else {
        Ok(arg.to_string())
    }
}

fn run_record<T>(engine: &Engine, command: RecordCommands) -> Result<()>
where
    T: Document + Row,
    Engine: Crud<T>,
{
    let kind = T::KIND;
    match command {
        RecordCommands::List => print_table(&Crud::<T>::list(engine)?),
        RecordCommands::Show { id } => {
            let record = Crud::<T>::get(engine, id)?;
            print_json(&record)?;
        }
        RecordCommands::Add { json } => {
            let payload = read_payload(&json)?;
            let entity: T = serde_json::from_str(&payload)
                .with_context(|| format!("Invalid {kind} payload"))?;
            let created = Crud::<T>::create(engine, entity)
                .with_context(|| format!("Failed to create {kind}"))?;
            println!("Added {kind} #{}", created.id());
            print_json(&created)?;
        }
        RecordCommands::Update { id, json } => {
            let payload = read_payload(&json)?;
            let entity: T = serde_json::from_str(&payload)
                .with_context(|| format!("Invalid {kind} payload"))?;
            let updated = Crud::<T>::update(engine, id, entity)
                .with_context(|| format!("Failed to update {kind} #{id}"))?;
            print_json(&updated)?;
        }
        RecordCommands::Delete { id } => {
            Crud::<T>::delete(engine, id).with_context(|| format!("Failed to delete {kind} #{id}"))?;
            println!("Deleted {kind} #{id}");
        }
    }
    Ok(())
}

fn open_engine(config: &Config) -> Result<Engine> {
    let store = SqliteStore::open(config)
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    Engine::open(Arc::new(store)).context("Failed to load caches")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hire=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.db, cli.timeout_ms);

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::open(&config).context("Failed to initialize database")?;
            println!("Database initialized at {}", store.path().display());
        }

        Commands::Status => {
            let engine = open_engine(&config)?;
            println!("Database: {}", config.db_path.display());
            println!(
                "{:<16} {:>8} {:>8} {:>8}  {}",
                "CACHE", "ENTRIES", "MAX ID", "NEXT ID", "REFRESHED"
            );
            println!("{}", "-".repeat(65));
            for status in engine.status()? {
                let refreshed = status
                    .refreshed_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<16} {:>8} {:>8} {:>8}  {}",
                    status.kind.name(),
                    status.entries,
                    status.max_id,
                    status.next_id,
                    refreshed
                );
            }
        }

        Commands::Country { command } => {
            let engine = open_engine(&config)?;
            match command {
                CountryCommands::Record(command) => run_record::<Country>(&engine, command)?,
                CountryCommands::Dependents { id } => {
                    let country = Crud::<Country>::get(&engine, id)?;
                    println!("{} ({})\n", country.name, country.code);
                    println!("Candidates:");
                    print_table(&engine.candidates_with_country(id)?);
                    println!("\nJob requisitions:");
                    print_table(&engine.requisitions_with_country(id)?);
                }
            }
        }

        Commands::Tag { command } => {
            let engine = open_engine(&config)?;
            match command {
                TagCommands::Record(command) => run_record::<Tag>(&engine, command)?,
                TagCommands::Find { label } => match engine.tag_by_label(&label)? {
                    Some(tag) => print_json(&tag)?,
                    None => println!("Tag '{}' not found.", label),
                },
                TagCommands::Resolve { labels } => {
                    let input = labels.iter().map(|l| Tag::labelled(l)).collect();
                    let resolved = engine.resolve_tags(input).context("Failed to resolve tags")?;
                    print_table(&resolved);
                }
            }
        }

        Commands::Candidate { command } => {
            let engine = open_engine(&config)?;
            match command {
                CandidateCommands::Record(command) => run_record::<Candidate>(&engine, command)?,
                CandidateCommands::Applications { id } => {
                    Crud::<Candidate>::get(&engine, id)?;
                    print_table(&engine.applications_of_candidate(id)?);
                }
            }
        }

        Commands::Requisition { command } => {
            let engine = open_engine(&config)?;
            match command {
                RequisitionCommands::Record(command) => {
                    run_record::<JobRequisition>(&engine, command)?
                }
                RequisitionCommands::Posted => print_table(&engine.posted_requisitions()?),
                RequisitionCommands::Applications { id } => {
                    let posted = engine.is_requisition_posted(id)?;
                    println!(
                        "Requisition #{} is {}\n",
                        id,
                        if posted { "posted" } else { "not posted" }
                    );
                    print_table(&engine.applications_of_requisition(id)?);
                }
            }
        }

        Commands::Application { command } => {
            let engine = open_engine(&config)?;
            run_record::<Application>(&engine, command)?;
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
