// ============================================================================
// membership — CLI for the token-gated membership ledger
// ============================================================================
// Usage:
//   membership init --owner ADDR --threshold 100    Create the ledger
//   membership balance set ADDR 150                 Record a token balance
//   membership admit ADDR                           Request admission
//   membership set-live --caller OWNER true         Toggle the live flag
//   membership set-threshold --caller OWNER 500     Change the threshold
//   membership status [--account ADDR]              Show ledger state
//   membership events --format json                 Dump the audit log
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use ledger_core::config::{load_dotenv, log_filter_from_env};
use ledger_core::{
    parse_threshold, AccessLedger, Account, EventRecord, LedgerConfig, LedgerDb, LedgerEvent,
    LedgerGenesis, TokenInfo,
};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type DbLedger = AccessLedger<Arc<LedgerDb>>;

/// Token-gated membership ledger
#[derive(Parser)]
#[command(name = "membership", version, about = "Manage a token-gated membership ledger")]
struct Cli {
    /// Path to the database file (default: ~/.membership/ledger.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ledger with an owner and admission threshold
    Init {
        /// Owner account (default: MEMBERSHIP_OWNER)
        #[arg(long)]
        owner: Option<String>,

        /// Minimum balance to join (default: MEMBERSHIP_THRESHOLD)
        #[arg(long, allow_hyphen_values = true)]
        threshold: Option<String>,

        /// Token symbol used for display
        #[arg(long)]
        symbol: Option<String>,

        /// Token decimals used for display
        #[arg(long)]
        decimals: Option<u8>,
    },

    /// Generate a random account identifier
    AccountNew,

    /// Inspect or feed the local token balance sheet
    Balance {
        #[command(subcommand)]
        action: BalanceCommand,
    },

    /// Request admission for an account
    Admit {
        account: String,
    },

    /// Set the live flag (owner only)
    SetLive {
        /// Account issuing the call
        #[arg(long)]
        caller: String,

        /// true/false, on/off, yes/no
        value: String,
    },

    /// Change the admission threshold (owner only)
    SetThreshold {
        /// Account issuing the call
        #[arg(long)]
        caller: String,

        #[arg(allow_hyphen_values = true)]
        value: String,
    },

    /// Show ledger state, optionally with an account's eligibility
    Status {
        #[arg(long)]
        account: Option<String>,
    },

    /// List members in admission order
    Members,

    /// Show the audit log
    Events {
        /// Only records with a greater sequence number
        #[arg(long, default_value = "0")]
        since: u64,

        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Recompute the event digest chain
    Verify,

    /// Show database statistics
    Stats,

    /// Export full ledger contents as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

#[derive(Subcommand)]
enum BalanceCommand {
    /// Record an account's token balance
    Set { account: String, amount: u64 },
    /// Show an account's token balance
    Get { account: String },
    /// List all recorded balances
    List,
}

fn parse_account(text: &str) -> Result<Account> {
    text.parse::<Account>().map_err(|e| anyhow!("{}", e))
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => anyhow::bail!("Unknown value '{}'. Valid values: true, false, on, off, yes, no", s),
    }
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn describe_event(event: &LedgerEvent) -> String {
    match event {
        LedgerEvent::MemberJoined { account } => format!("member joined: {}", account),
        LedgerEvent::LiveStatusChanged { value } => format!("live status: {}", value),
        LedgerEvent::ThresholdChanged { previous, current } => {
            format!("threshold: {} -> {}", previous, current)
        }
    }
}

fn init_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let dotenv = load_dotenv();
    init_logging(&log_filter_from_env());
    match dotenv {
        Ok(path) => debug!("Loaded {}", path.display()),
        Err(e) => debug!("{}", e),
    }

    if let Commands::AccountNew = cli.command {
        println!("{}", Account::random());
        return Ok(());
    }

    // Without --db-path, LedgerDb falls back to MEMBERSHIP_DB_PATH itself
    let db = Arc::new(LedgerDb::open(cli.db_path.as_deref())?);

    match cli.command {
        Commands::Init {
            owner,
            threshold,
            symbol,
            decimals,
        } => cmd_init(&db, &LedgerConfig::from_env()?, owner, threshold, symbol, decimals),
        Commands::AccountNew => Ok(()),
        Commands::Balance { action } => cmd_balance(&db, action),
        Commands::Admit { account } => cmd_admit(&db, &account),
        Commands::SetLive { caller, value } => cmd_set_live(&db, &caller, &value),
        Commands::SetThreshold { caller, value } => cmd_set_threshold(&db, &caller, &value),
        Commands::Status { account } => cmd_status(&db, account),
        Commands::Members => cmd_members(&db),
        Commands::Events { since, format } => cmd_events(&db, since, &format),
        Commands::Verify => cmd_verify(&db),
        Commands::Stats => cmd_stats(&db),
        Commands::Export { format } => cmd_export(&db, &format),
    }
}

fn load(db: &Arc<LedgerDb>) -> Result<DbLedger> {
    db.load_ledger(db.clone())
}

/// Persist the record first; memory only changes once the write landed
fn persist(db: &LedgerDb, ledger: &mut DbLedger, event: LedgerEvent) -> Result<EventRecord> {
    let record = ledger.seal(event);
    ledger.validate(&record)?;
    db.append_event(&record)?;
    ledger.commit(record.clone())?;
    info!("Committed event {} ({})", record.sequence, record.event.kind());
    Ok(record)
}

fn print_record(record: &EventRecord) {
    println!(
        "#{} {}  {}",
        record.sequence,
        format_timestamp(record.timestamp),
        describe_event(&record.event)
    );
}

fn cmd_init(
    db: &LedgerDb,
    config: &LedgerConfig,
    owner: Option<String>,
    threshold: Option<String>,
    symbol: Option<String>,
    decimals: Option<u8>,
) -> Result<()> {
    let owner = match owner {
        Some(text) => parse_account(&text)?,
        None => config
            .owner
            .ok_or_else(|| anyhow!("No owner given (use --owner or MEMBERSHIP_OWNER)"))?,
    };
    let threshold = match threshold {
        Some(text) => parse_threshold(&text)?,
        None => config.threshold.ok_or_else(|| {
            anyhow!("No threshold given (use --threshold or MEMBERSHIP_THRESHOLD)")
        })?,
    };
    let token = TokenInfo {
        symbol: symbol.unwrap_or_else(|| config.token.symbol.clone()),
        decimals: decimals.unwrap_or(config.token.decimals),
    };

    let genesis = LedgerGenesis::new(owner, threshold).with_token(token);
    db.init_genesis(&genesis)?;

    println!("Ledger initialized at {}", db.path().display());
    println!("Owner:     {}", genesis.owner);
    println!("Threshold: {}", genesis.token.display_amount(genesis.threshold));
    Ok(())
}

fn cmd_balance(db: &LedgerDb, action: BalanceCommand) -> Result<()> {
    let token = db.get_genesis()?.map(|g| g.token).unwrap_or_default();

    match action {
        BalanceCommand::Set { account, amount } => {
            let account = parse_account(&account)?;
            db.set_balance(&account, amount)?;
            println!("{}: {}", account, token.display_amount(amount));
        }
        BalanceCommand::Get { account } => {
            let account = parse_account(&account)?;
            let amount = db.get_balance(&account)?;
            println!("{}: {} ({} raw)", account, token.display_amount(amount), amount);
        }
        BalanceCommand::List => {
            let balances = db.list_balances()?;
            if balances.is_empty() {
                println!("No balances recorded.");
                return Ok(());
            }
            println!("{:<44}  {}", "ACCOUNT", "BALANCE");
            println!("{}", "-".repeat(64));
            for entry in &balances {
                println!("{:<44}  {}", entry.account, token.display_amount(entry.amount));
            }
            println!("\nTotal: {} accounts", balances.len());
        }
    }
    Ok(())
}

fn cmd_admit(db: &Arc<LedgerDb>, account: &str) -> Result<()> {
    let account = parse_account(account)?;
    let mut ledger = load(db)?;

    let event = ledger.plan_admit(&account)?;
    let record = persist(db, &mut ledger, event)?;

    print_record(&record);
    println!("Members: {}", ledger.member_count());
    Ok(())
}

fn cmd_set_live(db: &Arc<LedgerDb>, caller: &str, value: &str) -> Result<()> {
    let caller = parse_account(caller)?;
    let value = parse_bool(value)?;
    let mut ledger = load(db)?;

    let event = ledger.plan_live_status(&caller, value)?;
    let record = persist(db, &mut ledger, event)?;

    print_record(&record);
    Ok(())
}

fn cmd_set_threshold(db: &Arc<LedgerDb>, caller: &str, value: &str) -> Result<()> {
    let caller = parse_account(caller)?;
    let threshold = parse_threshold(value)?;
    let mut ledger = load(db)?;

    let event = ledger.plan_threshold(&caller, threshold)?;
    let record = persist(db, &mut ledger, event)?;

    print_record(&record);
    Ok(())
}

fn cmd_status(db: &Arc<LedgerDb>, account: Option<String>) -> Result<()> {
    let ledger = load(db)?;
    let genesis = ledger.genesis();
    let token = &genesis.token;

    println!("=== Membership Ledger ===");
    println!("Database:  {}", db.path().display());
    println!("Created:   {}", format_timestamp(genesis.created_at));
    println!("Owner:     {}", ledger.owner());
    println!("Threshold: {}", token.display_amount(ledger.current_threshold()));
    println!("Live:      {}", ledger.is_live());
    println!("Members:   {}", ledger.member_count());
    println!("Events:    {}", ledger.events().len());
    println!("Head:      {}", hex_head(&ledger));

    if let Some(account) = account {
        let account = parse_account(&account)?;
        let info = ledger.eligibility(&account);
        println!();
        println!("Account:   {}", info.account);
        println!("Balance:   {}", token.display_amount(info.balance));
        println!("Member:    {}", info.is_member);
        match (info.is_member, info.shortfall) {
            (true, _) => println!("Status:    already a member"),
            (false, None) => println!("Status:    eligible to join"),
            (false, Some(missing)) => {
                println!("Status:    needs {} more", token.display_amount(missing))
            }
        }
    }
    Ok(())
}

fn hex_head(ledger: &DbLedger) -> String {
    ledger
        .events()
        .records()
        .last()
        .map(|r| r.digest_hex())
        .unwrap_or_else(|| "(genesis)".to_string())
}

fn cmd_members(db: &Arc<LedgerDb>) -> Result<()> {
    let ledger = load(db)?;
    let members = ledger.members();

    if members.is_empty() {
        println!("No members yet.");
        return Ok(());
    }

    println!("{:<6}  {:<44}  {}", "SEQ", "ACCOUNT", "JOINED AT");
    println!("{}", "-".repeat(80));
    for member in &members {
        println!(
            "{:<6}  {:<44}  {}",
            member.sequence,
            member.account,
            format_timestamp(member.joined_at)
        );
    }
    println!("\nTotal: {} members", members.len());
    Ok(())
}

fn cmd_events(db: &LedgerDb, since: u64, format: &str) -> Result<()> {
    let records = db.events_since(since)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        "text" => {
            if records.is_empty() {
                println!("No events.");
            }
            for record in &records {
                print_record(record);
            }
        }
        other => anyhow::bail!("Unsupported format '{}'. Use 'text' or 'json'.", other),
    }
    Ok(())
}

fn cmd_verify(db: &Arc<LedgerDb>) -> Result<()> {
    // Loading replays and re-checks every digest
    let ledger = load(db)?;
    println!(
        "Event log OK: {} records, head {}",
        ledger.events().len(),
        hex_head(&ledger)
    );
    Ok(())
}

fn cmd_stats(db: &LedgerDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Membership Database Stats ===");
    println!("Database:    {}", db.path().display());
    println!("Initialized: {}", stats.initialized);
    println!();
    println!("Events:   {} total (last #{})", stats.total_events, stats.last_sequence);
    let mut counts: Vec<_> = stats.event_counts.iter().collect();
    counts.sort();
    for (kind, count) in counts {
        println!("  {:20} {}", kind, count);
    }
    println!("Balances: {}", stats.total_balances);

    Ok(())
}

fn cmd_export(db: &Arc<LedgerDb>, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let ledger = load(db)?;
    let members: Vec<_> = ledger.members().into_iter().cloned().collect();

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "genesis": ledger.genesis(),
        "threshold": ledger.current_threshold(),
        "live": ledger.is_live(),
        "members": members,
        "events": ledger.events().records(),
        "balances": db.list_balances()?,
        "stats": db.stats()?,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("ON").unwrap());
        assert!(!parse_bool("no").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_cli_parses_negative_threshold_text() {
        let cli = Cli::try_parse_from([
            "membership",
            "set-threshold",
            "--caller",
            "11111111111111111111111111111111",
            "-5",
        ])
        .unwrap();
        match cli.command {
            Commands::SetThreshold { value, .. } => {
                assert_eq!(value, "-5");
                assert!(parse_threshold(&value).is_err());
            }
            _ => panic!("expected set-threshold"),
        }
    }

    #[test]
    fn test_describe_event() {
        let text = describe_event(&LedgerEvent::ThresholdChanged {
            previous: 1,
            current: 2,
        });
        assert_eq!(text, "threshold: 1 -> 2");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }
}
