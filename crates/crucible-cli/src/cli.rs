use clap::{Parser, Subcommand, ValueEnum};
use crucible_config::OperatorConfig;

#[derive(Debug, Parser)]
#[command(name = "crucible", about = "Evaluation control plane: run it, or poke at a running one", version)]
pub struct Cli {
    /// Ops HTTP surface to query for read-only commands (status/pool/queue).
    #[arg(long, env = "CRUCIBLE_REMOTE", global = true, default_value = "http://127.0.0.1:8080")]
    pub remote: String,

    /// Bearer token for the ops HTTP surface.
    #[arg(long, env = "CRUCIBLE_TOKEN", global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the dispatcher, watcher, reconciler, reaper, and ops API in one process.
    Serve(ServeArgs),

    /// Submit an evaluation directly against the configured backends.
    ///
    /// There is no HTTP submission endpoint (that's the external gateway's
    /// job, see the ops API's own docs) — this writes the evaluation and
    /// enqueues it the same way a gateway would, for local development and
    /// integration tests. With in-memory backends this only makes sense
    /// called from the same process as `serve`; across separate `crucible`
    /// invocations, point both at shared `redis`/`postgres` backends.
    Submit(SubmitArgs),

    /// Request cancellation of an evaluation by publishing `cancel_requested`.
    Cancel(CancelArgs),

    /// Fetch one evaluation's current record from the ops API.
    Status { evaluation_id: String },

    /// Fetch current executor pool occupancy from the ops API.
    Pool,

    /// Fetch current queue depth from the ops API.
    Queue,
}

#[derive(Debug, Parser)]
pub struct ServeArgs {
    #[command(flatten)]
    pub operator: OperatorConfig,

    #[command(flatten)]
    pub backends: BackendArgs,

    /// Address to bind the ops HTTP API to.
    #[arg(long, env = "CRUCIBLE_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port to bind the ops HTTP API to.
    #[arg(long, env = "CRUCIBLE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Bearer token the ops HTTP API requires on every request.
    #[arg(long, env = "CRUCIBLE_AUTH_TOKEN")]
    pub auth_token: String,

    /// Number of reconciler shard tasks.
    #[arg(long, env = "CRUCIBLE_RECONCILER_SHARDS", default_value_t = 4)]
    pub reconciler_shards: usize,

    /// Dispatcher `pull` visibility timeout, in seconds.
    #[arg(long, env = "CRUCIBLE_DISPATCH_VISIBILITY_SECS", default_value_t = 30)]
    pub dispatch_visibility_secs: u64,
}

#[derive(Debug, Parser)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub backends: BackendArgs,

    /// Source code to submit. Reads stdin if omitted.
    #[arg(long)]
    pub code: Option<String>,

    #[arg(long)]
    pub language: String,

    #[arg(long, value_enum, default_value = "normal")]
    pub priority: PriorityArg,

    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u32,

    /// Arbitrary JSON metadata to attach to the evaluation.
    #[arg(long, default_value = "{}")]
    pub metadata: String,
}

#[derive(Debug, Parser)]
pub struct CancelArgs {
    #[command(flatten)]
    pub backends: BackendArgs,

    pub evaluation_id: String,
}

/// Backend selection shared by every subcommand that talks to storage
/// directly (`serve`, `submit`, `cancel`), so the three never drift into
/// three different ways of constructing the same stores.
#[derive(Debug, Parser)]
pub struct BackendArgs {
    #[arg(long, value_enum, env = "CRUCIBLE_DURABLE_STORE", default_value = "memory")]
    pub durable_store: StoreBackend,

    #[arg(long, env = "CRUCIBLE_POSTGRES_URL")]
    pub postgres_url: Option<String>,

    #[arg(long, value_enum, env = "CRUCIBLE_EPHEMERAL_STORE", default_value = "memory")]
    pub ephemeral_store: RedisBackedBackend,

    #[arg(long, value_enum, env = "CRUCIBLE_EVENT_BUS", default_value = "memory")]
    pub event_bus: RedisBackedBackend,

    #[arg(long, value_enum, env = "CRUCIBLE_QUEUE_BACKEND", default_value = "memory")]
    pub queue_backend: RedisBackedBackend,

    /// Shared by any backend above set to `redis`.
    #[arg(long, env = "CRUCIBLE_REDIS_URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RedisBackedBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    Normal,
    High,
}

impl From<PriorityArg> for crucible_domain::Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Normal => crucible_domain::Priority::Normal,
            PriorityArg::High => crucible_domain::Priority::High,
        }
    }
}
