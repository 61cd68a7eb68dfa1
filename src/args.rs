use clap::{Parser, Subcommand};

/// This is a tallying program for check-in spreadsheets.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) A JSON file with the settings of the session. Flags passed on the
    /// command line take precedence over its content.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (optional) The session to work on. A new session is created when neither this option nor
    /// the configuration file names one.
    #[clap(short, long, value_parser)]
    pub session: Option<String>,

    /// (directory, default data) Where the session ledgers and their backups are stored.
    #[clap(long, value_parser)]
    pub data_dir: Option<String>,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scores one or more spreadsheets, in the order given.
    Ingest {
        /// (.xlsx or .xls files) The rosters to score.
        #[clap(value_parser, required = true)]
        files: Vec<String>,

        /// (NAME=N, repeatable) The weight of a given file. Overrides the weights found in the
        /// sheet.
        #[clap(short, long = "weight", value_parser)]
        weights: Vec<String>,

        /// (default 1.0) Points for one row of weight 1.
        #[clap(long, value_parser)]
        base_score: Option<f64>,

        /// (default 0) Number of earliest submissions that get the reward.
        #[clap(long, value_parser)]
        reward_count: Option<usize>,

        /// (default 1.5) Multiplier applied to rewarded submissions.
        #[clap(long, value_parser)]
        reward_multiplier: Option<f64>,

        /// Score every row, even when an identifier appears several times in one file.
        #[clap(long, takes_value = false)]
        keep_duplicates: bool,
    },

    /// Prints the participants by decreasing score.
    Leaderboard {
        /// (optional) Only print the first entries.
        #[clap(short, long, value_parser)]
        limit: Option<usize>,
    },

    /// Prints the totals of the session.
    Stats,

    /// Lists the processed files, most recent first.
    Files,

    /// Lists the sessions stored in the data directory.
    Sessions,

    /// Writes the ledger as JSON.
    Export {
        /// (file path or empty) Where to write. Standard output when absent.
        #[clap(short, long, value_parser)]
        out: Option<String>,
    },

    /// Replaces the ledger with a previously exported one. A backup is taken first.
    Import {
        #[clap(value_parser)]
        path: String,
    },

    /// Folds several identifiers into one, e.g. to fix typos.
    Merge {
        /// The identifier to keep.
        #[clap(long, value_parser)]
        into: String,

        /// The identifiers to fold into the target.
        #[clap(value_parser, required = true)]
        sources: Vec<String>,
    },

    /// Empties the ledger. A backup is taken first.
    Clear,

    /// Writes a backup of the ledger.
    Backup,

    /// Describes the columns of a spreadsheet without scoring it.
    Inspect {
        #[clap(value_parser)]
        file: String,
    },
}
