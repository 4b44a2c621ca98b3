use alloy_primitives::Address;
use clap::{Args, Parser, Subcommand};
use liquidity_orchestrator::{
    balances::PositionReport,
    config::PartialConfig,
    ledger::JsonRpcLedger,
    models::{Amount, LiquidityAmounts, TokenRef, VerificationRequest},
    workflow::{Attestation, WorkflowOrchestrator, WorkflowReport},
    DeploymentConfig, Result,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "orchestrator",
    version,
    about = "Drive approvals, deposits and attestations against a liquidity pool"
)]
struct Cli {
    #[command(flatten)]
    deployment: DeploymentArgs,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the audit record of the run as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Flags override `ORCH_*` variables, which override the config file.
#[derive(Args, Debug)]
struct DeploymentArgs {
    /// JSON deployment file
    #[arg(long, global = true, env = "ORCH_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    rpc_url: Option<String>,
    #[arg(long, global = true)]
    sender: Option<Address>,
    #[arg(long, global = true)]
    pool: Option<Address>,
    #[arg(long, global = true)]
    token_a: Option<Address>,
    #[arg(long, global = true)]
    token_b: Option<Address>,
    #[arg(long, global = true)]
    decimals_a: Option<u8>,
    #[arg(long, global = true)]
    decimals_b: Option<u8>,
    #[arg(long, global = true)]
    verifier: Option<Address>,
    #[arg(long, global = true)]
    inclusion_timeout_secs: Option<u64>,
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,
    #[arg(long, global = true)]
    deadline_window_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Approve the pool to spend both tokens
    Approve {
        #[arg(long)]
        amount_a: String,
        #[arg(long)]
        amount_b: String,
    },
    /// Approve both tokens, then deposit them into the pool
    #[command(visible_alias = "provision")]
    AddLiquidity {
        #[command(flatten)]
        deposit: DepositArgs,
        /// Attest the deposit afterwards with this amountIn
        #[arg(long, requires = "author")]
        verify_amount_in: Option<String>,
        /// Author recorded by the verifier; only used with --verify-amount-in
        #[arg(long, requires = "verify_amount_in")]
        author: Option<String>,
    },
    /// Submit an attestation to the verifier contract
    Verify {
        #[arg(long)]
        amount_a: String,
        #[arg(long)]
        amount_b: String,
        #[arg(long)]
        amount_in: String,
        #[arg(long)]
        author: String,
    },
    /// Token A, token B and LP balances of an account
    Balances {
        /// Defaults to the signing account
        #[arg(long)]
        account: Option<Address>,
    },
    /// Balances plus the allowances granted to the pool
    Allowances {
        #[arg(long)]
        owner: Option<Address>,
    },
    /// Token balances held by the pool contract
    PoolReserves,
}

#[derive(Args, Debug)]
struct DepositArgs {
    #[arg(long)]
    amount_a: String,
    #[arg(long)]
    amount_b: String,
    /// Minimum token A accepted. Defaults to amount-a, which allows no
    /// slippage and fails unless the pool takes the full amount
    #[arg(long)]
    min_a: Option<String>,
    /// Minimum token B accepted. Defaults to amount-b, which allows no
    /// slippage and fails unless the pool takes the full amount
    #[arg(long)]
    min_b: Option<String>,
    /// LP recipient; defaults to the signing account
    #[arg(long)]
    recipient: Option<Address>,
}

impl DeploymentArgs {
    fn into_partial(self) -> (Option<PathBuf>, PartialConfig) {
        let flags = PartialConfig {
            rpc_url: self.rpc_url,
            sender: self.sender,
            pool: self.pool,
            token_a: self.token_a,
            token_b: self.token_b,
            decimals_a: self.decimals_a,
            decimals_b: self.decimals_b,
            verifier: self.verifier,
            inclusion_timeout_secs: self.inclusion_timeout_secs,
            poll_interval_ms: self.poll_interval_ms,
            deadline_window_secs: self.deadline_window_secs,
            read_retries: None,
        };
        (self.config, flags)
    }
}

impl DepositArgs {
    fn amounts(&self, config: &DeploymentConfig) -> Result<LiquidityAmounts> {
        let (token_a, token_b) = (config.pool.token_a, config.pool.token_b);
        let amount_a_desired = token_a.parse_amount(&self.amount_a)?;
        let amount_b_desired = token_b.parse_amount(&self.amount_b)?;

        Ok(LiquidityAmounts {
            amount_a_desired,
            amount_b_desired,
            amount_a_min: parse_or(&token_a, self.min_a.as_deref(), amount_a_desired)?,
            amount_b_min: parse_or(&token_b, self.min_b.as_deref(), amount_b_desired)?,
        })
    }
}

fn parse_or(token: &TokenRef, raw: Option<&str>, default: Amount) -> Result<Amount> {
    raw.map(|raw| token.parse_amount(raw))
        .transpose()
        .map(|amount| amount.unwrap_or(default))
}

fn load_config(args: DeploymentArgs) -> Result<DeploymentConfig> {
    let (path, flags) = args.into_partial();

    let file = match path {
        Some(path) => PartialConfig::from_file(&path)?,
        None => PartialConfig::default(),
    };

    file.merge(PartialConfig::from_env()?).merge(flags).build()
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            if e.is_ambiguous() {
                eprintln!("  the transaction may still be included; check the ledger before retrying");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.deployment)?;
    let json = cli.json;

    info!(
        rpc_url = %config.rpc_url,
        pool = %config.pool.address,
        "Liquidity orchestrator starting"
    );

    let ledger = JsonRpcLedger::connect(
        config.rpc_url.clone(),
        config.sender,
        config.poll_interval,
    )
    .await?;
    let ledger = Arc::new(ledger);
    let orchestrator = WorkflowOrchestrator::new(ledger, &config);
    let signer = orchestrator.signer();
    let pool = config.pool;

    let outcome = match cli.command {
        Command::Approve { amount_a, amount_b } => {
            let amount_a = pool.token_a.parse_amount(&amount_a)?;
            let amount_b = pool.token_b.parse_amount(&amount_b)?;
            orchestrator.approve_tokens(amount_a, amount_b).await
        }
        Command::AddLiquidity {
            deposit,
            verify_amount_in,
            author,
        } => {
            let amounts = deposit.amounts(&config)?;
            let recipient = deposit.recipient.unwrap_or(signer);

            match (verify_amount_in, author) {
                (Some(amount_in), Some(author)) => {
                    let attestation = Attestation {
                        amount_in: pool.token_a.parse_amount(&amount_in)?,
                        author,
                    };
                    orchestrator
                        .provision_and_verify(amounts, recipient, attestation)
                        .await
                }
                _ => orchestrator.provision_liquidity(amounts, recipient).await,
            }
        }
        Command::Verify {
            amount_a,
            amount_b,
            amount_in,
            author,
        } => {
            let req = VerificationRequest {
                pool: pool.address,
                token_a: pool.token_a.address,
                token_b: pool.token_b.address,
                amount_a: pool.token_a.parse_amount(&amount_a)?,
                amount_b: pool.token_b.parse_amount(&amount_b)?,
                // amountIn is denominated in token A
                amount_in: pool.token_a.parse_amount(&amount_in)?,
                author,
            };
            orchestrator.verify(req).await
        }
        Command::Balances { account } => {
            let position = orchestrator.position(account.unwrap_or(signer)).await?;
            return print_position(&orchestrator, &position, json);
        }
        Command::Allowances { owner } => {
            let report = orchestrator.allowance_report(owner.unwrap_or(signer)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            print_position(&orchestrator, &report.position, false)?;
            println!("Allowances granted to pool {}:", report.spender);
            println!("  token A: {}", pool.token_a.format_amount(report.allowance_a));
            println!("  token B: {}", pool.token_b.format_amount(report.allowance_b));
            return Ok(());
        }
        Command::PoolReserves => {
            let reserves = orchestrator.pool_reserves().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reserves)?);
                return Ok(());
            }
            println!("Holdings of pool {}:", pool.address);
            for token in pool.tokens() {
                let amount = reserves.get(&token.address).copied().unwrap_or_default();
                println!("  {}: {}", token.address, token.format_amount(amount));
            }
            return Ok(());
        }
    };

    report_workflow(&orchestrator, outcome, json).await
}

async fn report_workflow(
    orchestrator: &WorkflowOrchestrator,
    outcome: Result<WorkflowReport>,
    json: bool,
) -> Result<()> {
    if json {
        // Halted runs are journaled too
        if let Some(record) = orchestrator.audit_log().latest().await {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        return outcome.map(|_| ());
    }

    let report = outcome?;
    println!("\n=== WORKFLOW RESULT ===");
    println!("Workflow ID: {}", report.workflow_id);
    println!("Kind: {}", report.kind);
    println!("State: {}", report.state);
    for outcome in &report.steps {
        println!("  [{}] {}", outcome.step, outcome.detail);
    }
    println!("\nTrace:");
    for (i, line) in report.trace.iter().enumerate() {
        println!("  {}: {}", i + 1, line);
    }
    Ok(())
}

fn print_position(
    orchestrator: &WorkflowOrchestrator,
    position: &PositionReport,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(position)?);
        return Ok(());
    }

    let pool = orchestrator.pool();
    println!("Balances of {}:", position.account);
    println!(
        "  token A ({}): {}",
        pool.token_a.address,
        pool.token_a.format_amount(position.token_a)
    );
    println!(
        "  token B ({}): {}",
        pool.token_b.address,
        pool.token_b.format_amount(position.token_b)
    );
    // LP shares are minted with 18 decimals
    println!("  LP: {}", TokenRef::new(pool.address, 18).format_amount(position.lp));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("orchestrator").chain(args.iter().copied()))
    }

    #[test]
    fn test_author_needs_an_amount_in() {
        let deposit = ["add-liquidity", "--amount-a", "1", "--amount-b", "2"];

        let err = parse(&[&deposit[..], &["--author", "ops"][..]].concat()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = parse(&[&deposit[..], &["--verify-amount-in", "1"][..]].concat()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        assert!(parse(&[
            "provision",
            "--amount-a",
            "1",
            "--amount-b",
            "2",
            "--verify-amount-in",
            "1",
            "--author",
            "ops",
        ])
        .is_ok());
    }

    #[test]
    fn test_minimums_default_to_the_desired_amounts() {
        let cli = parse(&[
            "add-liquidity",
            "--amount-a",
            "1.5",
            "--amount-b",
            "2",
            "--min-b",
            "1",
        ])
        .unwrap();
        let Command::AddLiquidity { deposit, .. } = cli.command else {
            panic!("expected add-liquidity");
        };

        let config = PartialConfig {
            rpc_url: Some("http://localhost:8545".to_string()),
            pool: Some(Address::repeat_byte(0x50)),
            token_a: Some(Address::repeat_byte(0x0a)),
            token_b: Some(Address::repeat_byte(0x0b)),
            decimals_a: Some(6),
            decimals_b: Some(6),
            ..Default::default()
        }
        .build()
        .unwrap();

        let amounts = deposit.amounts(&config).unwrap();
        assert_eq!(amounts.amount_a_min, amounts.amount_a_desired);
        assert_eq!(amounts.amount_a_min, U256::from(1_500_000));
        assert_eq!(amounts.amount_b_min, U256::from(1_000_000));
    }
}
