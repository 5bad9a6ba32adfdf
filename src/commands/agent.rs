use clap::{Args, ValueEnum};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::agent::{CORPORATE_PERSONA, DATA_PERSONA, UltimateAgent};
use crate::commands::rag::RagOptions;
use crate::commands::{LogArgs, ModelArgs, Resolved, env_value, heading};
use crate::genai::embeddings::GeminiEmbeddings;
use crate::genai::{ChatConfig, GeminiClient};
use crate::retrieval::rag::{ChromaIndex, RagQueryEngine};
use crate::retrieval::sql::{
    DEFAULT_DATABASE_URL, EMPLOYEE_TABLE, NlSqlQueryEngine, SqlDatabase, is_in_memory,
};
use crate::retrieval::{ContextProvider, ContextSource};
use crate::weather::weather_tools;

pub const SQL_DEMO_QUESTION: &str = "Which department has the highest total salary and what is \
the maximum salary in the Sales department?";
pub const RAG_DEMO_QUESTION: &str =
    "What is the policy regarding remote work and how much is the mileage reimbursement rate?";
pub const TOOL_DEMO_QUESTION: &str = "What are the current weather conditions in Boston?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ContextChoice {
    Sql,
    Rag,
    /// Never initialize a provider; the prompt carries the unavailable notice
    None,
}

impl ContextChoice {
    pub fn source(self) -> ContextSource {
        match self {
            Self::Rag => ContextSource::Rag,
            Self::Sql | Self::None => ContextSource::Sql,
        }
    }

    pub fn persona(self) -> &'static str {
        match self {
            Self::Sql => DATA_PERSONA,
            Self::Rag | Self::None => CORPORATE_PERSONA,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Rag => "rag",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct AgentArgs {
    /// Questions routed through the context provider; runs the demo pair when omitted
    pub questions: Vec<String>,
    /// Context provider consulted before each question
    #[arg(long, value_enum, default_value_t = ContextChoice::Sql)]
    pub context: ContextChoice,
    /// SQLite URL for the SQL provider
    #[arg(long = "database-url")]
    pub database_url: Option<String>,
    /// Tables the SQL provider may query (repeatable)
    #[arg(long = "table")]
    pub tables: Vec<String>,
    /// Create and fill the demo employee_info table (always done for in-memory databases)
    #[arg(long)]
    pub seed: bool,
    #[command(flatten)]
    pub rag: RagOptions,
    /// Print the resolved plan without calling the model
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub log: LogArgs,
}

struct SqlTarget {
    url: String,
    tables: Vec<String>,
    seed: bool,
}

impl AgentArgs {
    fn sql_target(&self, settings: &Resolved) -> SqlTarget {
        let url = self
            .database_url
            .clone()
            .or_else(|| env_value("GEMLAB_DATABASE_URL"))
            .or_else(|| settings.profile.database_url.clone())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let tables = if !self.tables.is_empty() {
            self.tables.clone()
        } else {
            settings
                .profile
                .tables
                .clone()
                .filter(|tables| !tables.is_empty())
                .unwrap_or_else(|| vec![EMPLOYEE_TABLE.to_string()])
        };
        let seed = self.seed || is_in_memory(&url);
        SqlTarget { url, tables, seed }
    }
}

async fn open_database(target: &SqlTarget) -> Result<SqlDatabase, String> {
    let database = SqlDatabase::connect(&target.url)
        .await
        .map_err(|err| err.to_string())?;
    if target.seed {
        database
            .seed_employee_info()
            .await
            .map_err(|err| err.to_string())?;
    }
    Ok(database)
}

pub async fn run(args: AgentArgs) -> Result<(), String> {
    args.log.init();

    let settings = args.model.resolve()?;
    let source = args.context.source();

    if args.dry_run {
        let plan = dry_run_plan(&args, &settings).await?;
        let encoded = serde_json::to_string_pretty(&plan)
            .map_err(|err| format!("Failed to encode plan: {err}"))?;
        println!("{encoded}");
        return Ok(());
    }

    let client = settings.client()?;

    let mut database = None;
    let provider: Option<Box<dyn ContextProvider>> = match args.context {
        ContextChoice::Sql => {
            let target = args.sql_target(&settings);
            match open_database(&target).await {
                Ok(db) => {
                    database = Some(db.clone());
                    info!(url = %target.url, tables = ?target.tables, "SQL provider ready");
                    let engine = NlSqlQueryEngine::new(
                        db,
                        client.clone(),
                        settings.model.clone(),
                        target.tables,
                    );
                    Some(Box::new(engine) as Box<dyn ContextProvider>)
                }
                Err(err) => {
                    warn!(error = %err, "SQL engine setup failed; continuing with function calling only");
                    None
                }
            }
        }
        ContextChoice::Rag => match rag_provider(&args, &settings, &client).await {
            Ok(engine) => Some(Box::new(engine) as Box<dyn ContextProvider>),
            Err(err) => {
                warn!(error = %err, "RAG engine setup failed; continuing with function calling only");
                None
            }
        },
        ContextChoice::None => None,
    };

    let session = client.chat(
        ChatConfig::new(settings.model.clone())
            .with_system_instruction(Some(args.context.persona().to_string()))
            .with_tools(weather_tools()),
    );
    let mut agent = UltimateAgent::new(session, source, provider);
    println!(
        "Agent ready: context={} provider={}",
        args.context.as_str(),
        if agent.has_provider() { "ready" } else { "unavailable" }
    );

    let outcome = run_questions(&mut agent, &args).await;

    if let Some(database) = database {
        database.close().await;
    }
    outcome
}

async fn run_questions(agent: &mut UltimateAgent, args: &AgentArgs) -> Result<(), String> {
    if !args.questions.is_empty() {
        for (index, question) in args.questions.iter().enumerate() {
            let reply = agent
                .run_query(question)
                .await
                .map_err(|err| err.to_string())?;
            println!("\n{}", heading(&format!("QUERY {}", index + 1)));
            println!("User: {question}\nAgent: {}", reply.text);
        }
        return Ok(());
    }

    let demo_question = match args.context {
        ContextChoice::Rag => RAG_DEMO_QUESTION,
        ContextChoice::Sql | ContextChoice::None => SQL_DEMO_QUESTION,
    };
    let reply = agent
        .run_query(demo_question)
        .await
        .map_err(|err| err.to_string())?;
    println!(
        "\n{}",
        heading(&format!("QUERY 1 ({} Agent Test):", args.context.as_str().to_uppercase()))
    );
    println!("User: {demo_question}\nAgent: {}", reply.text);

    let tool_reply = agent
        .ask_direct(TOOL_DEMO_QUESTION)
        .await
        .map_err(|err| err.to_string())?;
    println!("\n{}", heading("QUERY 2 (Tool Test):"));
    println!("User: {TOOL_DEMO_QUESTION}\nAgent: {}", tool_reply.text.trim());
    Ok(())
}

async fn rag_provider(
    args: &AgentArgs,
    settings: &Resolved,
    client: &GeminiClient,
) -> Result<RagQueryEngine, String> {
    let rag = args.rag.resolve(&settings.profile)?;
    let index = ChromaIndex::connect(&rag.chroma_url, &rag.collection)
        .await
        .map_err(|err| err.to_string())?;
    let embedder = GeminiEmbeddings::new(client.clone(), rag.embedding_model);
    Ok(RagQueryEngine::new(
        client.clone(),
        settings.model.clone(),
        embedder,
        index,
        rag.top_k,
    ))
}

async fn dry_run_plan(args: &AgentArgs, settings: &Resolved) -> Result<Value, String> {
    let questions: Vec<&str> = if args.questions.is_empty() {
        let first = match args.context {
            ContextChoice::Rag => RAG_DEMO_QUESTION,
            ContextChoice::Sql | ContextChoice::None => SQL_DEMO_QUESTION,
        };
        vec![first, TOOL_DEMO_QUESTION]
    } else {
        args.questions.iter().map(String::as_str).collect()
    };

    let mut plan = json!({
        "dry_run": true,
        "model": settings.model,
        "context": args.context.as_str(),
        "persona": args.context.persona(),
        "tools": weather_tools().names(),
        "questions": questions,
    });

    match args.context {
        ContextChoice::Sql => {
            let target = args.sql_target(settings);
            let database = open_database(&target).await?;
            let schema = database.describe_tables(&target.tables).await;
            database.close().await;
            let schema = schema.map_err(|err| err.to_string())?;
            plan["database_url"] = json!(target.url);
            plan["tables"] = json!(target.tables);
            plan["schema"] = json!(schema);
        }
        ContextChoice::Rag => {
            let rag = args.rag.resolve(&settings.profile)?;
            plan["chroma_url"] = json!(rag.chroma_url);
            plan["collection"] = json!(rag.collection);
            plan["top_k"] = json!(rag.top_k);
            plan["embedding_model"] = json!(rag.embedding_model);
        }
        ContextChoice::None => {}
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileConfig;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        args: AgentArgs,
    }

    fn settings() -> Resolved {
        Resolved {
            profile: ProfileConfig::default(),
            model: "gemini-2.5-flash".to_string(),
            api_base: "http://localhost".to_string(),
            timeout_secs: None,
            retries: 0,
            retry_delay_ms: 0,
        }
    }

    fn target(argv: &[&str]) -> SqlTarget {
        let harness = Harness::parse_from(std::iter::once("agent").chain(argv.iter().copied()));
        harness.args.sql_target(&settings())
    }

    #[test]
    fn every_in_memory_url_is_seeded() {
        assert!(target(&["--database-url", "sqlite::memory:"]).seed);
        assert!(target(&["--database-url", "sqlite:file:demo?mode=memory&cache=shared"]).seed);
        assert!(!target(&["--database-url", "sqlite://hr.db"]).seed);
        assert!(target(&["--database-url", "sqlite://hr.db", "--seed"]).seed);
    }

    #[test]
    fn tables_default_to_the_demo_table() {
        let target = target(&["--database-url", "sqlite://hr.db"]);
        assert_eq!(target.tables, vec![EMPLOYEE_TABLE.to_string()]);
    }
}
