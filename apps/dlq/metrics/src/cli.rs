use clap::{Parser, Subcommand};
use dlq_worker::{DEFAULT_TOP_K, DEFAULT_WORKER_COUNT};

#[derive(Parser, Debug)]
#[command(name = "dlq-metrics")]
#[command(about = "CLI to get Pub/Sub dead-letter-queue metrics from GCP")]
#[command(
    after_help = "Example: dlq-metrics --projectID=jojo-is-awesome-project --subscriptionID=jojoisawesome.push.dlq.pull"
)]
pub struct Cli {
    /// The project ID (falls back to GCP_PROJECT_ID)
    #[arg(short = 'p', long = "projectID", global = true)]
    pub project_id: Option<String>,

    /// The subscription ID to report on when no subcommand is given
    #[arg(short = 's', long = "subscriptionID")]
    pub subscription_id: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List all the dead-letter-queue subscriptions
    #[command(visible_alias = "l")]
    List,

    /// Show the number of undelivered messages for the top dead-letter-queue subscriptions
    #[command(visible_alias = "mdlq")]
    MetricsDlq {
        /// The number of most offenders
        #[arg(
            short = 'n',
            long = "numMostOffenders",
            default_value_t = DEFAULT_TOP_K as i64,
            allow_negative_numbers = true
        )]
        num_most_offenders: i64,

        /// Number of concurrent metric queries
        #[arg(short, long, default_value_t = DEFAULT_WORKER_COUNT)]
        workers: usize,
    },

    /// Pull messages from a subscription, log their bodies and ack them
    #[command(visible_alias = "r")]
    Receive {
        /// The subscription ID
        #[arg(short = 's', long = "subscriptionID")]
        subscription_id: String,

        /// How many messages to pull
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        messages: i64,
    },

    /// Report the top offenders on a fixed interval until interrupted
    #[command(visible_alias = "w")]
    Watch {
        /// Seconds between reports
        #[arg(short, long, default_value_t = 60)]
        interval_secs: u64,

        /// The number of most offenders
        #[arg(
            short = 'n',
            long = "numMostOffenders",
            default_value_t = DEFAULT_TOP_K as i64,
            allow_negative_numbers = true
        )]
        num_most_offenders: i64,

        /// Number of concurrent metric queries
        #[arg(short, long, default_value_t = DEFAULT_WORKER_COUNT)]
        workers: usize,
    },
}
