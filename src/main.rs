use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use governance_ledger::anchor::{
    verify_chain, AnchorIdResolver, Anchorer, ChainOptions, ReceiptResolver, StemResolver,
};
use governance_ledger::audit::merkle::root_of_json_file;
use governance_ledger::audit::{segment_root, verify_ledger, LedgerWriter, VerifyOptions};
use governance_ledger::config::AppConfig;
use governance_ledger::error::exit_code;
use governance_ledger::policy::{sign_manifest, PolicyGate, PolicyManifest, PolicyToken};
use governance_ledger::validation::{EventDraft, EventSchemaValidator, SchemaRegistry};
use governance_ledger::GovernanceError;

#[derive(Parser)]
#[command(name = "governance-ledger")]
#[command(about = "Tamper-evident governance ledger with Merkle anchoring")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to governance-ledger.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append an event to the ledger
    Append {
        #[arg(short, long)]
        agent: String,

        /// Event type, e.g. PROCESS_COMPLETED
        #[arg(short, long)]
        event_type: String,

        /// Track (defaults to the configured default_track)
        #[arg(short, long)]
        track: Option<String>,

        /// Inline JSON payload
        #[arg(short, long, conflicts_with = "payload_file")]
        payload: Option<String>,

        /// File holding the JSON payload
        #[arg(long)]
        payload_file: Option<PathBuf>,

        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Verify the hash chain of the whole ledger
    Verify {
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Stop after this many entries
        #[arg(long)]
        max_lines: Option<usize>,
    },
    /// Merkle root of a JSON array of records
    MerkleRoot {
        path: PathBuf,
    },
    /// Merkle root over a window of ledger entries
    SegmentRoot {
        /// First entry index (0-based)
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// End entry index (exclusive); defaults to the end of the ledger
        #[arg(long)]
        end: Option<usize>,

        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Publish an anchor record for a Merkle root
    Anchor {
        /// Root to anchor; computed from the ledger window when omitted
        #[arg(long)]
        root: Option<String>,

        #[arg(long, default_value_t = 0)]
        start: usize,

        #[arg(long)]
        end: Option<usize>,
    },
    /// Publish the zero-root terminus closing the anchor chain
    Terminate,
    /// Verify the anchor chain
    VerifyChain {
        /// Anchor directory (defaults to the configured anchor_dir)
        dir: Option<PathBuf>,

        /// Use file stems as network IDs instead of receipts
        #[arg(long)]
        local: bool,

        #[arg(long)]
        max_files: Option<usize>,
    },
    /// Policy manifest operations
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// Check an event file against the declared schemas
    ValidateEvent {
        path: PathBuf,

        /// Schema file (defaults to the configured schema_path)
        #[arg(long)]
        schema: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Write the manifest signature
    Sign,
    /// Check the manifest signature
    Check,
    /// Compare listed files against their recorded hashes
    Drift {
        /// Directory manifest paths are relative to
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "governance_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // clap's own exit status 2 would read as a structural failure
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_code::USAGE
            } else {
                exit_code::OK
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            e.downcast_ref::<GovernanceError>()
                .map_or(exit_code::USAGE, GovernanceError::exit_code)
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let json = cli.json;

    match cli.command {
        Commands::Append {
            agent,
            event_type,
            track,
            payload,
            payload_file,
            ledger,
        } => {
            let token = gate(&config)?;
            let payload = read_payload(payload.as_deref(), payload_file.as_deref())?;
            let track = track.unwrap_or_else(|| config.default_track.clone());

            let mut writer = LedgerWriter::open(ledger.unwrap_or_else(|| config.ledger_path.clone()))?;
            if let Some(schema_path) = &config.schema_path {
                writer = writer.with_validator(Box::new(SchemaRegistry::load(schema_path)?));
            }

            let entry = writer.append(&token, &agent, &track, &event_type, payload)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("{}", entry.hash);
            }
            Ok(exit_code::OK)
        }

        Commands::Verify { ledger, max_lines } => {
            let path = ledger.unwrap_or_else(|| config.ledger_path.clone());
            let options = VerifyOptions {
                max_lines: max_lines.or(config.max_scan),
            };
            let report = verify_ledger(&path, &options)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for v in &report.violations {
                    println!(
                        "line {}: {} expected={} found={}",
                        v.line, v.kind, v.expected, v.found
                    );
                }
                println!("{}", report.summary());
            }

            report.ensure_valid()?;
            Ok(exit_code::OK)
        }

        Commands::MerkleRoot { path } => {
            println!("{}", root_of_json_file(&path)?);
            Ok(exit_code::OK)
        }

        Commands::SegmentRoot { start, end, ledger } => {
            let path = ledger.unwrap_or_else(|| config.ledger_path.clone());
            let segment = segment_root(&path, start..end.unwrap_or(usize::MAX))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&segment)?);
            } else {
                println!("{}", segment.merkle_root);
            }
            Ok(exit_code::OK)
        }

        Commands::Anchor { root, start, end } => {
            let token = gate(&config)?;
            let root = match root {
                Some(root) => root,
                None => {
                    segment_root(&config.ledger_path, start..end.unwrap_or(usize::MAX))?
                        .merkle_root
                }
            };

            let anchorer = Anchorer::from_config(&config)?;
            let outcome = anchorer.anchor(&token, &root).await?;
            println!("{}", outcome.anchor_path.display());
            Ok(exit_code::OK)
        }

        Commands::Terminate => {
            let token = gate(&config)?;
            let anchorer = Anchorer::from_config(&config)?;
            let outcome = anchorer.terminate(&token).await?;
            println!("{}", outcome.anchor_path.display());
            Ok(exit_code::OK)
        }

        Commands::VerifyChain {
            dir,
            local,
            max_files,
        } => {
            let dir = dir.unwrap_or_else(|| config.anchor_dir.clone());
            let resolver: &dyn AnchorIdResolver = if local {
                &StemResolver
            } else {
                &ReceiptResolver
            };
            let options = ChainOptions {
                max_files: max_files.or(config.max_scan),
            };

            let report = verify_chain(&dir, resolver, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
            }
            report.ensure_ok()?;
            Ok(exit_code::OK)
        }

        Commands::Policy { command } => run_policy(&config, command, json),

        Commands::ValidateEvent { path, schema } => {
            let schema = schema
                .or_else(|| config.schema_path.clone())
                .ok_or_else(|| GovernanceError::Usage("no schema file configured".to_string()))?;
            let registry = SchemaRegistry::load(&schema)?;

            let text = fs::read_to_string(&path)
                .map_err(|e| GovernanceError::io(format!("Failed to read {}", path.display()), e))?;
            let event: Value = serde_json::from_str(&text).map_err(|e| {
                GovernanceError::Structural(format!("{} is not JSON: {}", path.display(), e))
            })?;

            let payload = event.get("payload").cloned().unwrap_or(Value::Null);
            registry.validate(&EventDraft {
                agent: str_field(&event, "agent"),
                track: str_field(&event, "track"),
                event_type: str_field(&event, "event_type"),
                payload: &payload,
            })?;

            println!("{}: valid", path.display());
            Ok(exit_code::OK)
        }
    }
}

fn run_policy(config: &AppConfig, command: PolicyCommands, json: bool) -> Result<i32> {
    match command {
        PolicyCommands::Sign => {
            let hash = sign_manifest(&config.policy_manifest, &config.policy_signature)?;
            println!("{}", hash);
            Ok(exit_code::OK)
        }
        PolicyCommands::Check => {
            let token = gate(config)?;
            println!("Policy signature valid: {}", token.manifest_hash());
            Ok(exit_code::OK)
        }
        PolicyCommands::Drift { base_dir } => {
            let manifest = PolicyManifest::load(&config.policy_manifest)?;
            let report = manifest.check_drift(&base_dir)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for (file, drift) in &report.drift {
                    let actual = drift.actual.as_deref().unwrap_or("missing");
                    println!("{}: expected {} found {}", file, drift.expected, actual);
                }
                println!(
                    "Policy {}: {} files checked, {} drifted",
                    report.version,
                    report.checked,
                    report.drift.len()
                );
            }

            Ok(if report.is_clean() {
                exit_code::OK
            } else {
                exit_code::SIGNATURE
            })
        }
    }
}

/// Mandatory signature check before any mutating command
fn gate(config: &AppConfig) -> Result<PolicyToken> {
    let token = PolicyGate::new(&config.policy_manifest, &config.policy_signature)
        .validate_signature()
        .context("Policy signature gate refused the operation")?;
    info!("Policy signature verified: {}", &token.manifest_hash()[..12]);
    Ok(token)
}

fn str_field<'a>(event: &'a Value, name: &str) -> &'a str {
    event.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn read_payload(inline: Option<&str>, file: Option<&Path>) -> Result<Value, GovernanceError> {
    let text = match (inline, file) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => fs::read_to_string(path)
            .map_err(|e| GovernanceError::io(format!("Failed to read {}", path.display()), e))?,
        (None, None) => return Ok(Value::Object(Default::default())),
    };
    serde_json::from_str(&text)
        .map_err(|e| GovernanceError::Usage(format!("payload is not valid JSON: {}", e)))
}
