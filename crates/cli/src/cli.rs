use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "sopmatrix",
    version,
    about = "Normalize SOP role matrices and answer questions over them"
)]
pub struct Cli {
    /// Configuration file (defaults to ./sopmatrix.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct WorkbookArgs {
    /// xlsx/xls/ods workbook, or a csv/tsv export of one sheet
    pub workbook: PathBuf,
    /// Only read this sheet
    #[arg(long)]
    pub sheet: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long = "role")]
    pub roles: Vec<String>,
    #[arg(long = "group")]
    pub groups: Vec<String>,
    /// Applicability code (1-3) or label
    #[arg(long = "category")]
    pub categories: Vec<String>,
    #[arg(long = "practice")]
    pub practices: Vec<String>,
    #[arg(long = "region")]
    pub regions: Vec<String>,
    #[arg(long = "business-unit")]
    pub business_units: Vec<String>,
    #[arg(long = "sop-type")]
    pub sop_types: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List role columns and their groups per sheet
    Roles {
        #[command(flatten)]
        input: WorkbookArgs,
    },
    /// Print the normalized fact table
    Facts {
        #[command(flatten)]
        input: WorkbookArgs,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Export the filtered fact view as CSV
    Filter {
        #[command(flatten)]
        input: WorkbookArgs,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Write one context text file per role
    Contexts {
        #[command(flatten)]
        input: WorkbookArgs,
        #[arg(long = "out-dir")]
        out_dir: PathBuf,
    },
    /// Parse a prescriptive-rule audience export into learning items
    Audience {
        #[command(flatten)]
        input: WorkbookArgs,
        #[arg(long = "role")]
        roles: Vec<String>,
        #[arg(long = "group")]
        groups: Vec<String>,
        #[arg(long = "practice")]
        practices: Vec<String>,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Split a text file into overlapping chunks (JSON lines)
    Chunk {
        input: PathBuf,
        #[arg(long)]
        size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Answer a question from text files and/or a workbook's role contexts
    Ask {
        question: String,
        #[arg(long = "corpus")]
        corpus: Vec<PathBuf>,
        #[arg(long)]
        workbook: Option<PathBuf>,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, action = ArgAction::SetTrue)]
        show_context: bool,
    },
}
