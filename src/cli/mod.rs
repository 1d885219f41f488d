//! CLI command definitions and parsing
use crate::types::{DocumentId, OwnerId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ragdesk",
    version,
    author = "neur0map",
    about = "Ask questions about your own documents",
    long_about = "ragdesk keeps a private, persistent vector collection per user. Documents are \
                  split into overlapping chunks and embedded on ingest; questions are answered \
                  from the most similar chunks with the source documents cited."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/ragdesk/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a document to an owner's collection
    Ingest {
        /// Document to ingest (.txt, .pdf or .docx)
        file: PathBuf,

        /// Owner of the collection
        #[arg(short, long, value_parser = parse_owner)]
        owner: OwnerId,

        /// Document id used for later deletion
        #[arg(short, long, value_parser = parse_document)]
        document: DocumentId,
    },

    /// Ask a question about an owner's documents
    Ask {
        /// Question to ask
        question: String,

        /// Owner of the collection
        #[arg(short, long, value_parser = parse_owner)]
        owner: OwnerId,

        /// Show the response in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove every chunk of a document
    Delete {
        /// Owner of the collection
        #[arg(short, long, value_parser = parse_owner)]
        owner: OwnerId,

        /// Document to remove
        #[arg(short, long, value_parser = parse_document)]
        document: DocumentId,
    },

    /// Destroy an owner's whole collection
    Clear {
        /// Owner of the collection
        #[arg(short, long, value_parser = parse_owner)]
        owner: OwnerId,
    },

    /// Show how many chunks an owner has stored
    Count {
        /// Owner of the collection
        #[arg(short, long, value_parser = parse_owner)]
        owner: OwnerId,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_owner(value: &str) -> Result<OwnerId, String> {
    OwnerId::new(value).map_err(|e| e.to_string())
}

fn parse_document(value: &str) -> Result<DocumentId, String> {
    DocumentId::new(value).map_err(|e| e.to_string())
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ingest() {
        let cli = Cli::try_parse_from([
            "ragdesk", "ingest", "notes.txt", "--owner", "7", "--document", "12",
        ])
        .unwrap();

        match cli.command {
            Commands::Ingest {
                file,
                owner,
                document,
            } => {
                assert_eq!(file, PathBuf::from("notes.txt"));
                assert_eq!(owner, OwnerId::from(7));
                assert_eq!(document, DocumentId::from(12));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unsafe_owner() {
        let result = Cli::try_parse_from(["ragdesk", "count", "--owner", "../other"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ragdesk", "ask", "what?", "-o", "1", "--json", "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Ask { json: true, .. }));
    }
}
