use clap::{Args, Parser, Subcommand};
use gallery_sync_core::Section;

#[derive(Debug, Parser)]
#[command(name = "gallery-sync")]
#[command(about = "Mirror user galleries into a local archive", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Crawl sections of the given users, or of every stored user
    Update(UpdateArgs),
    /// Archive single submissions by id
    Fetch(FetchArgs),
    /// Upgrade the store to the current version
    Upgrade {
        /// Do not probe the site; unresolved names fall back to the handle
        #[arg(long)]
        offline: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Compare the store with the files on disk
    Check {
        /// Fix what can be fixed (orphan directories are only reported)
        #[arg(long)]
        fix: bool,
    },
    /// Probe every stored user and list accounts that are gone or disabled
    UsersSync,
    /// Manage stored users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Show store metadata
    Info,
    /// Rebuild indices and reclaim free pages
    Compact,
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// User names; every stored user when empty
    pub users: Vec<String>,
    /// Sections to crawl (gallery, scraps, favorites, extras or g/s/f/e)
    #[arg(short, long, value_delimiter = ',')]
    pub sections: Vec<Section>,
    /// Delay step per downloaded chunk; overrides the configured speed
    #[arg(long)]
    pub speed: Option<u32>,
    /// Crawl sections marked disabled
    #[arg(short, long)]
    pub force: bool,
    /// Paginate and classify without downloading or writing
    #[arg(long)]
    pub dry_run: bool,
    /// Stop after this many new downloads
    #[arg(long)]
    pub stop_after: Option<usize>,
    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[arg(required = true)]
    pub ids: Vec<u64>,
    /// Download again and replace the stored row
    #[arg(long)]
    pub overwrite: bool,
    /// Skip the archived-item check before requesting the page
    #[arg(long)]
    pub no_dedup: bool,
    #[arg(short, long)]
    pub quiet: bool,
    #[arg(long)]
    pub speed: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum UserAction {
    /// List stored users with their sections
    List,
    /// Add a user with the given sections enabled
    Add {
        handle: String,
        /// Display name; defaults to the handle
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long, value_delimiter = ',', default_values_t = [Section::Gallery, Section::Scraps])]
        sections: Vec<Section>,
    },
    /// Enable sections for crawling
    Enable {
        handle: String,
        #[arg(value_delimiter = ',', required = true)]
        sections: Vec<Section>,
    },
    /// Stop crawling sections (memberships are kept)
    Disable {
        handle: String,
        #[arg(value_delimiter = ',', required = true)]
        sections: Vec<Section>,
    },
    /// Delete a user row; archived submissions stay
    Remove {
        handle: String,
        #[arg(short, long)]
        yes: bool,
    },
}
