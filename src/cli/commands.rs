use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "effectdeck")]
#[command(version, about = "A mergeable, bilingual catalog of image transformation prompts")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Read and write catalogs through this server instead of the local files
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new effectdeck project in the current directory
    Init {
        /// Do not seed the built-in catalog
        #[arg(long)]
        empty: bool,
    },

    /// Serve the catalogs over HTTP
    Serve {
        /// Address to listen on (default from config, then 127.0.0.1:4317)
        #[arg(long)]
        bind: Option<String>,
    },

    /// List transformations, built-ins and custom entries merged
    List {
        /// Display locale (en, zh, zh-CN, ...)
        #[arg(long, short = 'l')]
        locale: Option<String>,

        /// Include hidden built-ins
        #[arg(long)]
        all: bool,

        /// Ignore hidden keys and patches
        #[arg(long)]
        raw: bool,

        /// Filter, e.g. "category:style sunset" or "source:custom"
        #[arg(long, short = 'q')]
        query: Option<String>,

        /// Group by category
        #[arg(long)]
        grouped: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a custom transformation
    Add(EffectArgs),

    /// Replace the custom transformation under KEY
    Update {
        /// Entry key
        key: String,

        #[command(flatten)]
        effect: EffectArgs,
    },

    /// Delete a custom transformation
    Delete {
        /// Entry key
        key: String,
    },

    /// Delete every custom transformation
    Clear {
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Hide a built-in transformation
    Hide {
        /// Built-in key
        key: String,
    },

    /// Show a hidden built-in transformation again
    Restore {
        /// Built-in key
        key: String,
    },

    /// Patch the display fields of a built-in transformation
    Override {
        /// Built-in key
        key: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        prompt: Option<String>,

        #[arg(long)]
        icon: Option<String>,

        /// Category (custom, style, elements, scene, lighting, special)
        #[arg(long)]
        category: Option<String>,
    },

    /// Remove the patch on a built-in transformation
    Unoverride {
        /// Built-in key
        key: String,
    },

    /// Forget all hidden keys and patches
    ClearOverrides,

    /// Read every store strictly and report corrupt documents
    Check,
}

/// Fields of a custom transformation, shared by `add` and `update`.
#[derive(Args, Debug)]
pub struct EffectArgs {
    /// Title shown in listings
    pub title: String,

    /// Prompt text (omit with --stdin)
    pub prompt: Option<String>,

    /// Read the prompt from stdin
    #[arg(long)]
    pub stdin: bool,

    /// Chinese title (defaults to the English one)
    #[arg(long)]
    pub zh_title: Option<String>,

    /// Chinese prompt (defaults to the English one)
    #[arg(long)]
    pub zh_prompt: Option<String>,

    /// Material icon name
    #[arg(long)]
    pub icon: Option<String>,

    /// Category (custom, style, elements, scene, lighting, special)
    #[arg(long, short = 'c')]
    pub category: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
