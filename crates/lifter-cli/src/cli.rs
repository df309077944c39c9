//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Coordination-minimizing decomposition and synthesis for replicated operations.\n\n\
    Typical path:\n  \
    1. lifter decompose cart.lift\n  \
    2. lifter synthesize cart.lift --target 1.0 --forbid crdt_or_set\n  \
    3. lifter emit cart.lift --emit-format rust --out cart_protocol.rs\n\n\
    Exit codes: 0 reached, 1 unreachable, 2 unsupported specification,\n\
    3 requirement conflict, 4 other failure.";

#[derive(Parser)]
#[command(name = "lifter")]
#[command(about = "Split replicated operations into coordination-free and agreement parts")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    /// Output format: text | json
    #[arg(long, global = true, default_value = "text")]
    pub(crate) format: String,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Classify an operation's invariant as existential or universal
    Classify {
        /// Path to the .lift file
        file: PathBuf,
    },

    /// Split an operation into its existential and universal parts
    Decompose {
        /// Path to the .lift file
        file: PathBuf,

        /// Workload trace JSON for the workload-weighted lifting fraction
        #[arg(long)]
        workload: Option<PathBuf>,
    },

    /// Restructure an operation until its lifting fraction reaches the target
    Synthesize {
        /// Path to the .lift file
        file: PathBuf,

        #[command(flatten)]
        synthesis: SynthesisArgs,
    },

    /// Synthesize, then emit the hybrid protocol
    Emit {
        /// Path to the .lift file
        file: PathBuf,

        #[command(flatten)]
        synthesis: SynthesisArgs,

        /// Protocol format: json | rust
        #[arg(long, default_value = "json")]
        emit_format: String,

        /// Agreement primitive for the residual: consensus | atomic-broadcast
        #[arg(long, default_value = "consensus")]
        primitive: String,

        /// Name of the agreement binding (default: <operation>-agreement)
        #[arg(long)]
        binding: Option<String>,

        /// Write the protocol here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// List the restructuring catalog in canonical order
    Catalog,
}

#[derive(Args, Clone, Debug)]
pub(crate) struct SynthesisArgs {
    /// Target lifting fraction in [0, 1]
    #[arg(long, default_value_t = 1.0)]
    pub(crate) target: f64,

    /// Requirements JSON; flags below override or extend it
    #[arg(long)]
    pub(crate) requirements: Option<PathBuf>,

    /// Forbid an operator (and everything that refines it); repeatable
    #[arg(long = "forbid")]
    pub(crate) forbid: Vec<String>,

    /// Weakest acceptable consistency: eventual | causal | sequential | linearizable
    #[arg(long)]
    pub(crate) min_consistency: Option<String>,

    /// Largest semantic cost the whole plan may incur
    #[arg(long)]
    pub(crate) max_cost: Option<f64>,

    /// Cost budget; exhausting it is reported as unreachable, not as a conflict
    #[arg(long)]
    pub(crate) budget: Option<f64>,

    /// Lifting fraction below which a universal residual counts as inherent
    #[arg(long)]
    pub(crate) floor: Option<f64>,

    /// Wall-clock limit for synthesis in milliseconds
    #[arg(long)]
    pub(crate) timeout_ms: Option<u64>,
}
