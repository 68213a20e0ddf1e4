//! kbqa CLI
//!
//! - `kbqa ask`: answer a question with the grounded retrieval agent
//! - `kbqa baseline`: answer with the prompt-only model (no retrieval)
//! - `kbqa bench`: compare both on a case set and write JSON/Markdown reports,
//!   optionally with an LLM judge verdict per case (`--judge`)

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use kbqa_agent::{
    build_chat_model, AgentOptions, ChatModel, GroundedAgent, LlmBackend, LlmSettings,
    OutcomeKind, PromptOnlyAgent, Run, ToolSettings, Toolkit,
};
use kbqa_bench::cases::DEFAULT_MAX_GROUND_TRUTH_FACTS;
use kbqa_bench::scorer::DEFAULT_THRESHOLD;
use kbqa_bench::{
    default_cases, load_cases, run_benchmark, BenchmarkOptions, ComparisonRunner,
    EvalContextMode, GroundTruthStyle, LexicalOverlapScorer, LlmJudge,
};
use kbqa_graph::{GraphSettings, HttpDocumentSource, HttpSparqlEndpoint};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kbqa")]
#[command(
    author,
    version,
    about = "kbqa: question answering grounded in the Wikidata knowledge graph"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct LlmArgs {
    /// LLM backend: mock, ollama or openai (default: KBQA_LLM_BACKEND, then ollama).
    #[arg(long)]
    backend: Option<String>,

    /// Model name (default: KBQA_LLM_MODEL, then the backend's default).
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature (default: KBQA_LLM_TEMPERATURE, then 0.1).
    #[arg(long)]
    temperature: Option<f32>,
}

#[derive(Args, Debug, Clone, Default)]
struct AgentArgs {
    /// Step ceiling for the tool loop (default: KBQA_MAX_STEPS, then 40).
    #[arg(long)]
    max_steps: Option<usize>,

    /// SPARQL endpoint (default: KBQA_SPARQL_ENDPOINT, then the public query service).
    #[arg(long)]
    sparql_endpoint: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct JudgeArgs {
    /// Ask an LLM judge for a side-by-side verdict on every case.
    #[arg(long)]
    judge: bool,

    /// Judge backend (default: the answering backend).
    #[arg(long, requires = "judge")]
    judge_backend: Option<String>,

    /// Judge model (default: the answering model, or the judge backend's default).
    #[arg(long, requires = "judge")]
    judge_model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question with the grounded retrieval agent.
    Ask {
        question: String,

        #[command(flatten)]
        llm: LlmArgs,

        #[command(flatten)]
        agent: AgentArgs,

        /// Print the full run (answer, tool calls, stop reason) as JSON.
        #[arg(long)]
        json: bool,

        /// Print each tool call and its output.
        #[arg(long)]
        show_tools: bool,
    },

    /// Answer a question with the prompt-only baseline.
    Baseline {
        question: String,

        #[command(flatten)]
        llm: LlmArgs,

        #[arg(long)]
        json: bool,
    },

    /// Compare the grounded agent with the baseline on a case set.
    Bench {
        /// JSON array of cases (default: the built-in set).
        #[arg(long)]
        cases: Option<PathBuf>,

        /// Directory for benchmark_results.json and benchmark_report.md.
        #[arg(long, default_value = "benchmark_output")]
        out_dir: PathBuf,

        /// Scores below this count as hallucinations.
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Evaluation context: ground_truth or combined.
        #[arg(long, default_value = "ground_truth")]
        mode: String,

        /// Reference style: concise or rich.
        #[arg(long, default_value = "concise")]
        style: String,

        /// Key facts appended to rich references.
        #[arg(long, default_value_t = DEFAULT_MAX_GROUND_TRUTH_FACTS)]
        max_facts: usize,

        #[command(flatten)]
        llm: LlmArgs,

        #[command(flatten)]
        agent: AgentArgs,

        #[command(flatten)]
        judge: JudgeArgs,

        /// Print the report JSON to stdout as well.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("warn"))
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            question,
            llm,
            agent,
            json,
            show_tools,
        } => cmd_ask(&question, &llm, &agent, json, show_tools),
        Commands::Baseline {
            question,
            llm,
            json,
        } => cmd_baseline(&question, &llm, json),
        Commands::Bench {
            cases,
            out_dir,
            threshold,
            mode,
            style,
            max_facts,
            llm,
            agent,
            judge,
            json,
        } => {
            let options = BenchmarkOptions {
                threshold,
                mode: EvalContextMode::parse(&mode)
                    .ok_or_else(|| anyhow!("unknown --mode {mode:?} (expected ground_truth or combined)"))?,
                ground_truth_style: GroundTruthStyle::parse(&style)
                    .ok_or_else(|| anyhow!("unknown --style {style:?} (expected concise or rich)"))?,
                max_ground_truth_facts: max_facts,
            };
            cmd_bench(cases.as_ref(), &out_dir, options, &llm, &agent, &judge, json)
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn llm_settings(args: &LlmArgs) -> Result<LlmSettings> {
    let mut settings = LlmSettings::from_env()?;
    if let Some(name) = &args.backend {
        settings = settings.with_backend(LlmBackend::parse(name)?);
    }
    if let Some(model) = &args.model {
        settings = settings.with_model(model.clone());
    }
    if let Some(temperature) = args.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(anyhow!("--temperature must be within 0.0..=2.0"));
        }
        settings = settings.with_temperature(temperature);
    }
    Ok(settings)
}

fn chat_model(settings: &LlmSettings) -> Result<Box<dyn ChatModel>> {
    eprintln!("{}", settings.status_line().dimmed());
    build_chat_model(settings).context("failed to initialize the language model")
}

fn judge_settings(answering: &LlmSettings, args: &JudgeArgs) -> Result<LlmSettings> {
    let mut settings = answering.clone();
    if let Some(name) = &args.judge_backend {
        settings = settings.with_backend(LlmBackend::parse(name)?);
    }
    if let Some(model) = &args.judge_model {
        settings = settings.with_model(model.clone());
    }
    Ok(settings)
}

fn grounded_agent(model: Box<dyn ChatModel>, args: &AgentArgs) -> Result<GroundedAgent> {
    let mut graph = GraphSettings::from_env()?;
    if let Some(endpoint) = &args.sparql_endpoint {
        graph = graph.with_sparql_endpoint(endpoint.clone());
    }
    let toolkit = Toolkit::new(
        Box::new(HttpSparqlEndpoint::new(&graph)?),
        Box::new(HttpDocumentSource::new(&graph)?),
    )
    .with_settings(ToolSettings::from_env()?);

    let mut options = AgentOptions::from_env()?;
    if let Some(max_steps) = args.max_steps {
        options = options.with_max_steps(max_steps);
    }
    Ok(GroundedAgent::new(model, toolkit).with_options(options))
}

// ============================================================================
// Commands
// ============================================================================

fn print_tool_calls(run: &Run) {
    for (i, call) in run.tool_calls.iter().enumerate() {
        let status = match call.outcome {
            OutcomeKind::Ok => "ok".green(),
            OutcomeKind::NoData => "no data".yellow(),
            _ => format!("{:?}", call.outcome).to_lowercase().red(),
        };
        eprintln!(
            "{} {} {} [{}]",
            format!("[{}]", i + 1).dimmed(),
            call.tool.bold(),
            call.arguments,
            status
        );
        for line in call.output.lines() {
            eprintln!("    {line}");
        }
    }
}

fn cmd_ask(
    question: &str,
    llm: &LlmArgs,
    agent_args: &AgentArgs,
    json: bool,
    show_tools: bool,
) -> Result<()> {
    let settings = llm_settings(llm)?;
    let agent = grounded_agent(chat_model(&settings)?, agent_args)?;
    let run = agent.answer(question);

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }
    if show_tools {
        print_tool_calls(&run);
    }
    if let Some(err) = &run.error {
        eprintln!("{} {err}", "warning:".yellow().bold());
    }
    eprintln!(
        "{} steps={} tools={} stop={:?}",
        "done".green().bold(),
        run.steps,
        run.tool_calls.len(),
        run.stop_reason
    );
    println!("{}", run.final_answer);
    Ok(())
}

fn cmd_baseline(question: &str, llm: &LlmArgs, json: bool) -> Result<()> {
    let settings = llm_settings(llm)?;
    let baseline = PromptOnlyAgent::new(chat_model(&settings)?);
    let answer = baseline.answer(question);

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }
    if let Some(err) = &answer.error {
        eprintln!("{} {err}", "warning:".yellow().bold());
    }
    println!("{}", answer.answer);
    Ok(())
}

fn cmd_bench(
    cases_path: Option<&PathBuf>,
    out_dir: &PathBuf,
    options: BenchmarkOptions,
    llm: &LlmArgs,
    agent_args: &AgentArgs,
    judge_args: &JudgeArgs,
    json: bool,
) -> Result<()> {
    let cases = match cases_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            load_cases(&text).with_context(|| format!("invalid case file {}", path.display()))?
        }
        None => default_cases(),
    };

    let settings = llm_settings(llm)?;
    let rag = grounded_agent(chat_model(&settings)?, agent_args)?;
    let baseline = PromptOnlyAgent::new(build_chat_model(&settings)?);
    let scorer = LexicalOverlapScorer;
    let judge = if judge_args.judge {
        let settings = judge_settings(&settings, judge_args)?;
        eprintln!("{}", format!("judge {}", settings.status_line()).dimmed());
        let model = build_chat_model(&settings).context("failed to initialize the judge model")?;
        Some(LlmJudge::new(model))
    } else {
        None
    };
    let mut runner = ComparisonRunner::new(&rag, &baseline, &scorer).with_options(options);
    if let Some(judge) = &judge {
        runner = runner.with_judge(judge);
    }

    eprintln!(
        "{} {} cases (mode={}, threshold={:.2})",
        "running".cyan().bold(),
        cases.len(),
        options.mode.as_str(),
        options.threshold
    );
    let report = run_benchmark(&runner, &cases)?;

    for (i, case) in report.cases.iter().enumerate() {
        let r = &case.result;
        let mark = |hallucinated: bool| {
            if hallucinated {
                "✗".red()
            } else {
                "✓".green()
            }
        };
        let judge = match (&case.judge_winner, &r.llm_judge) {
            (Some(w), _) => format!(" judge={}", w.to_string().bold()),
            (None, Some(_)) => format!(" judge={}", "error".red()),
            (None, None) => String::new(),
        };
        eprintln!(
            "{:>2}. {}  grounded={:.3}{} prompt-only={:.3}{} winner={}{}",
            i + 1,
            r.question,
            r.rag.score,
            mark(r.rag.is_hallucination),
            r.prompt_only.score,
            mark(r.prompt_only.is_hallucination),
            case.winner.to_string().bold(),
            judge
        );
    }

    let (json_path, md_path) = report.save(out_dir)?;
    eprintln!("{} {}", "wrote".green().bold(), json_path.display().to_string().bold());
    eprintln!("{} {}", "wrote".green().bold(), md_path.display().to_string().bold());
    if json {
        println!("{}", report.to_json()?);
    }
    Ok(())
}
