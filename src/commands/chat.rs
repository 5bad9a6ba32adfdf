use std::io::{self, Write};

use clap::{Args, ValueEnum};
use tracing::info;

use crate::agent::{CORPORATE_PERSONA, DATA_PERSONA, SCIENCE_PERSONA};
use crate::commands::{LogArgs, ModelArgs, dimmed, env_value, heading};
use crate::genai::tools::ToolRegistry;
use crate::genai::types::UsageMetadata;
use crate::genai::{ChatConfig, ChatSession};
use crate::weather::weather_tools;

pub const DEMO_PROMPTS: [&str; 2] = [
    "explain the fundamental principles of quantum entanglement",
    "what is the weather like in boston and tokyo today?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Persona {
    Science,
    Corporate,
    Data,
    None,
}

impl Persona {
    pub fn instruction(self) -> Option<&'static str> {
        match self {
            Self::Science => Some(SCIENCE_PERSONA),
            Self::Corporate => Some(CORPORATE_PERSONA),
            Self::Data => Some(DATA_PERSONA),
            Self::None => None,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ChatArgs {
    /// Messages sent in order within one session; two demo prompts when omitted
    pub prompts: Vec<String>,
    /// Built-in system persona
    #[arg(long, value_enum, default_value_t = Persona::Science)]
    pub persona: Persona,
    /// Custom system instruction (replaces the persona)
    #[arg(long)]
    pub system: Option<String>,
    /// Do not register the weather tool
    #[arg(long = "no-tools")]
    pub no_tools: bool,
    /// Stream each reply as it is generated
    #[arg(long)]
    pub stream: bool,
    /// Print the full conversation history
    #[arg(long)]
    pub history: bool,
    /// Count the tokens of the final history
    #[arg(long = "count-tokens")]
    pub count_tokens: bool,
    /// Model used for token counting (defaults to the chat model)
    #[arg(long = "count-model", requires = "count_tokens")]
    pub count_model: Option<String>,
    /// Print usage metadata of the last reply
    #[arg(long = "show-usage")]
    pub show_usage: bool,
    /// Truncate the history to the most recent N turns at the end
    #[arg(long)]
    pub keep: Option<usize>,
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub log: LogArgs,
}

pub fn format_usage(usage: &UsageMetadata) -> String {
    let field = |value: Option<u32>| value.map_or_else(|| "-".to_string(), |n| n.to_string());
    format!(
        "prompt_token_count={} candidates_token_count={} thoughts_token_count={} total_token_count={}",
        field(usage.prompt_token_count),
        field(usage.candidates_token_count),
        field(usage.thoughts_token_count),
        field(usage.total_token_count),
    )
}

pub async fn run(args: ChatArgs) -> Result<(), String> {
    args.log.init();

    let settings = args.model.resolve()?;
    let client = settings.client()?;

    let system = args
        .system
        .clone()
        .or_else(|| env_value("GEMLAB_SYSTEM"))
        .or_else(|| settings.profile.system.clone())
        .or_else(|| args.persona.instruction().map(str::to_string));
    let tools = if args.no_tools {
        ToolRegistry::new()
    } else {
        weather_tools()
    };
    info!(model = %settings.model, tools = ?tools.names(), "chat session created");

    let mut session = client.chat(
        ChatConfig::new(settings.model.clone())
            .with_system_instruction(system)
            .with_tools(tools),
    );

    let prompts: Vec<String> = if args.prompts.is_empty() {
        DEMO_PROMPTS.iter().map(|prompt| prompt.to_string()).collect()
    } else {
        args.prompts.clone()
    };

    for (index, prompt) in prompts.iter().enumerate() {
        let turn = index + 1;
        println!("User {turn}: {prompt}");
        if args.stream {
            print!("Agent {turn}: ");
            let _ = io::stdout().flush();
            let mut sink = |chunk: &str| {
                print!("{chunk}");
                let _ = io::stdout().flush();
            };
            send_streamed(&mut session, prompt, &mut sink).await?;
            println!();
        } else {
            let reply = session
                .send_message(prompt.as_str())
                .await
                .map_err(|err| err.to_string())?;
            println!("Agent {turn}: {}", reply.text.trim());
        }
    }

    if args.history {
        println!();
        println!("{}", heading("---FULL CONVERSATION HISTORY---"));
        for line in session.render_history() {
            println!("{line}");
        }
    }

    if args.count_tokens {
        let total = session
            .count_history_tokens(args.count_model.as_deref())
            .await
            .map_err(|err| err.to_string())?;
        println!();
        println!("Total tokens in History (Input Cost): {total}");
    }

    if args.show_usage {
        println!();
        println!("{}", heading("---USAGE METADATA---"));
        match session.last_usage() {
            Some(usage) => println!("{}", format_usage(usage)),
            None => println!("{}", dimmed("usage metadata unavailable")),
        }
    }

    if let Some(keep) = args.keep {
        let total = session.history().len();
        if total > keep {
            let removed = session.truncate_history(keep);
            println!("Truncating history: Removing {removed} of {total} turns...");
        } else {
            println!("History is short enough; no truncation needed.");
        }
    }
    Ok(())
}

async fn send_streamed(
    session: &mut ChatSession,
    prompt: &str,
    sink: &mut (dyn FnMut(&str) + Send),
) -> Result<(), String> {
    session
        .send_message_stream(prompt, sink)
        .await
        .map(|_| ())
        .map_err(|err| err.to_string())
}
