use clap::Parser;
use effectdeck::cli::{
    handle_add, handle_check, handle_clear, handle_clear_overrides, handle_delete, handle_hide,
    handle_init, handle_list, handle_override, handle_restore, handle_serve, handle_unoverride,
    handle_update, Cli, Commands,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("effectdeck=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let server = cli.server;

    let result = match cli.command {
        Commands::Init { empty } => handle_init(empty),
        Commands::Serve { bind } => handle_serve(bind),
        Commands::List {
            locale,
            all,
            raw,
            query,
            grouped,
            json,
        } => handle_list(server, locale, all, raw, query, grouped, json),
        Commands::Add(args) => handle_add(server, args),
        Commands::Update { key, effect } => handle_update(server, key, effect),
        Commands::Delete { key } => handle_delete(server, key),
        Commands::Clear { force } => handle_clear(server, force),
        Commands::Hide { key } => handle_hide(server, key),
        Commands::Restore { key } => handle_restore(server, key),
        Commands::Override {
            key,
            title,
            prompt,
            icon,
            category,
        } => handle_override(server, key, title, prompt, icon, category),
        Commands::Unoverride { key } => handle_unoverride(server, key),
        Commands::ClearOverrides => handle_clear_overrides(server),
        Commands::Check => handle_check(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
