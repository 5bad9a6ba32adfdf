use std::io;
use std::process;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};
use gemlab::commands::agent::{self, AgentArgs};
use gemlab::commands::ask::{self, AskArgs};
use gemlab::commands::chat::{self, ChatArgs};
use gemlab::commands::config::{self, ConfigArgs};
use gemlab::commands::describe::{self, DescribeArgs};
use gemlab::commands::extract::{self, ExtractArgs};
use gemlab::commands::rag::{self, RagArgs};
use gemlab::commands::upload::{self, UploadArgs};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("GEMLAB_GIT_SHA"),
    "\nbuilt: ",
    env!("GEMLAB_BUILD_TS")
);

const ROOT_HELP_EXAMPLES: &str = "Examples:\n  gemlab ask \"Explain why learning the Gemini API is a smart career move in one paragraph.\"\n  echo \"2+2?\" | gemlab ask --model gemini-2.5-flash --stream\n  gemlab chat --history --count-tokens --keep 2\n  gemlab agent --context sql --dry-run\n  gemlab config check\n  gemlab completion bash > ~/.local/share/bash-completion/completions/gemlab";

const ASK_HELP_EXAMPLES: &str = "Examples:\n  gemlab ask \"2+2?\"\n  echo \"2+2?\" | gemlab ask --model gemini-2.5-pro --stream\n  gemlab ask --dry-run --json \"Explain retries\"";

const AGENT_HELP_EXAMPLES: &str = "Examples:\n  gemlab agent\n  gemlab agent --context rag --chroma-url http://localhost:8000 \"How much is the mileage rate?\"\n  gemlab agent --database-url sqlite://hr.db --table employee_info --dry-run";

#[derive(Debug, Parser)]
#[command(
    name = "gemlab",
    about = "Gemini API walkthrough: prompting, tools, grounding and agents",
    version,
    long_version = LONG_VERSION,
    after_help = ROOT_HELP_EXAMPLES
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Send a single prompt to a Gemini model", after_help = ASK_HELP_EXAMPLES)]
    Ask(AskArgs),
    #[command(about = "Describe an image with a multimodal prompt")]
    Describe(DescribeArgs),
    #[command(about = "Extract a structured product review as JSON")]
    Extract(ExtractArgs),
    #[command(about = "Chat with a persona and the weather tool")]
    Chat(ChatArgs),
    #[command(about = "Upload a file, query it, then delete it")]
    Upload(UploadArgs),
    #[command(about = "Index policy documents in Chroma and answer from them")]
    Rag(RagArgs),
    #[command(about = "Answer with SQL or policy context injected into a tool-enabled chat", after_help = AGENT_HELP_EXAMPLES)]
    Agent(AgentArgs),
    #[command(about = "Manage local config")]
    Config(ConfigArgs),
    #[command(about = "Generate shell completion script")]
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn print_completion(shell: CompletionShell) {
    let mut cmd = Cli::command();
    match shell {
        CompletionShell::Bash => generate(shells::Bash, &mut cmd, "gemlab", &mut io::stdout()),
        CompletionShell::Zsh => generate(shells::Zsh, &mut cmd, "gemlab", &mut io::stdout()),
        CompletionShell::Fish => generate(shells::Fish, &mut cmd, "gemlab", &mut io::stdout()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ask(args) => ask::run(args).await,
        Commands::Describe(args) => describe::run(args).await,
        Commands::Extract(args) => extract::run(args).await,
        Commands::Chat(args) => chat::run(args).await,
        Commands::Upload(args) => upload::run(args).await,
        Commands::Rag(args) => rag::run(args).await,
        Commands::Agent(args) => agent::run(args).await,
        Commands::Config(args) => config::run(args),
        Commands::Completion { shell } => {
            print_completion(shell);
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(1);
    }
}
