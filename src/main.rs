use clap::{Parser, Subcommand};
use scriptorium_sync::{config, run, scan};

#[derive(Parser)]
#[command(name = "scriptorium-sync", about = "Scriptorium - content synchronization engine")]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Print the manifest of a content tree as JSON
	Scan {
		/// Root directory to scan
		root: String,
	},
	/// Run the sync server (default)
	Run,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	match cli.command.unwrap_or(Commands::Run) {
		Commands::Scan { root } => match scan::Scanner::new(&root).scan() {
			Ok(manifest) => match serde_json::to_string_pretty(&manifest) {
				Ok(json) => println!("{}", json),
				Err(e) => eprintln!("Failed to encode manifest: {}", e),
			},
			Err(e) => eprintln!("Scan failed: {}", e),
		},
		Commands::Run => {
			match config::load() {
				Ok(settings) => println!(
					"Loaded settings: host={} port={}",
					settings.host, settings.port
				),
				Err(e) => eprintln!("Warning: failed to load config: {}", e),
			}

			run().await;
		}
	}
}
