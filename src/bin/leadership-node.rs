use clap::Parser;
use leadership::{
    test_utils::{create_test_cluster, eventually, TestCluster},
    LeadershipConfig, Result,
};
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs an in-process cluster and shows leadership moving between nodes.
#[derive(Parser, Debug)]
#[command(name = "leadership-node", version, about, long_about = None)]
struct Cli {
    /// Number of simulated nodes
    #[arg(short, long, default_value_t = 3)]
    nodes: usize,

    /// Topics every node contests
    #[arg(short, long, value_delimiter = ',', default_value = "alpha,beta")]
    topics: Vec<String>,

    /// Lease term in milliseconds
    #[arg(long)]
    term_ms: Option<u64>,

    /// Delay between acquisition attempts in milliseconds
    #[arg(long)]
    retry_ms: Option<u64>,

    /// Number of failover rounds to run
    #[arg(short, long, default_value_t = 3)]
    rounds: usize,

    /// JSON leadership config; environment overrides still apply
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<LeadershipConfig> {
    let base = match &cli.config {
        Some(path) => LeadershipConfig::from_file(path)?,
        None => LeadershipConfig {
            term_duration_ms: 1_000,
            retry_delay_ms: 250,
            ..LeadershipConfig::default()
        },
    };
    let mut config = base.with_env_overrides()?;
    if let Some(term) = cli.term_ms {
        config.term_duration_ms = term;
    }
    if let Some(retry) = cli.retry_ms {
        config.retry_delay_ms = retry;
    }
    config.validate()?;
    Ok(config)
}

fn print_board(cluster: &TestCluster, topics: &[String]) {
    for topic in topics {
        match cluster.agreed_leader(topic) {
            Some(leader) => {
                let epoch = cluster
                    .node(0)
                    .get_leadership(topic)
                    .map(|l| l.epoch())
                    .unwrap_or_default();
                info!("  {:<12} leader {} (epoch {})", topic, leader, epoch);
            }
            None => info!("  {:<12} no agreed leader", topic),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let settle = Duration::from_millis(config.term_duration_ms + config.retry_delay_ms * 2);

    info!("Leadership demo starting...");
    info!("Nodes: {}, topics: {:?}", cli.nodes, cli.topics);
    info!(
        "Term: {}ms, retry: {}ms",
        config.term_duration_ms, config.retry_delay_ms
    );

    let cluster = create_test_cluster(cli.nodes, config)?;
    for node in &cluster.nodes {
        info!("Node {} started", node.local_node());
        for topic in &cli.topics {
            node.run_for_leadership(topic)?;
        }
    }

    let mut rng = rand::thread_rng();
    for round in 1..=cli.rounds {
        let converged = eventually(settle, || {
            cli.topics.iter().all(|t| cluster.agreed_leader(t).is_some())
        })
        .await;
        if !converged {
            warn!("Round {}: cluster did not converge within {:?}", round, settle);
        }
        info!("Round {} leader board:", round);
        print_board(&cluster, &cli.topics);

        for topic in &cli.topics {
            let Some(leader) = cluster.agreed_leader(topic).and_then(|id| cluster.find(id)) else {
                continue;
            };
            if rng.gen_bool(0.5) {
                info!("Leader {} withdraws from {}", leader.local_node(), topic);
                leader.withdraw(topic).await?;
                // Rejoin so the node stays a candidate for later rounds
                leader.run_for_leadership(topic)?;
            } else {
                info!("Lease for {} revoked under {}", topic, leader.local_node());
                cluster.leases.revoke(topic);
            }
        }
    }

    tokio::time::sleep(settle).await;
    info!("Final leader board:");
    print_board(&cluster, &cli.topics);

    cluster.stop();
    info!("Leadership demo finished");
    Ok(())
}
