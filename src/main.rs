//! tandem 命令行入口
//!
//! - `chat`：交互式 ReAct 对话
//! - `generate [INSTRUCTION]`：生成计划并标记为待执行
//! - `execute [--watch]`：接手最近的就绪计划并执行；`--watch` 持续轮询新计划
//! - `plans`：列出计划目录中的全部计划

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tandem::agent::{AgentRole, AgentSession, SessionOptions};
use tandem::config::{load_config, AppConfig};
use tandem::core::{run_until_shutdown, ShutdownManager};
use tandem::pipeline::{JsonPlanStore, PlanStore, PollOutcome};
use tandem::react::prompts::EXECUTOR_TRIGGER;
use tandem::react::ReactEvent;

#[derive(Parser)]
#[command(name = "tandem", version, about = "MCP 工具端点管理、ReAct 推理循环与计划生成/执行流水线")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 交互式对话
    Chat,
    /// 由指令生成计划
    Generate {
        /// 目标描述；省略时从标准输入读取一行
        instruction: Option<String>,
    },
    /// 执行最近的就绪计划
    Execute {
        /// 持续轮询新计划
        #[arg(long)]
        watch: bool,
    },
    /// 列出全部计划
    Plans,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tandem::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    let role = match &cli.command {
        Command::Plans => return print_plans(&cfg),
        Command::Chat => AgentRole::React,
        Command::Generate { .. } => AgentRole::Generator,
        Command::Execute { .. } => AgentRole::Executor,
    };

    let instruction = match &cli.command {
        Command::Generate { instruction: Some(text) } => Some(text.clone()),
        Command::Generate { instruction: None } => Some(
            prompt_line("What should the plan achieve? ")
                .await?
                .context("No instruction given")?,
        ),
        _ => None,
    };

    let manager = Arc::new(ShutdownManager::new());
    manager.install_signal_handlers();

    let llm = tandem::llm::create_client(&cfg.llm).context("Failed to create LLM client")?;
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(print_events(event_rx));

    let options = SessionOptions::new(role)
        .with_cancel_token(manager.token())
        .with_event_tx(event_tx);
    let mut session = AgentSession::build(&cfg, llm, options)
        .await
        .context("Failed to start agent session")?;
    let guard = session.guard();
    let token = manager.token();
    let mut reasons = manager.subscribe();

    let result = run_until_shutdown(&manager, guard, async {
        match &cli.command {
            Command::Chat => chat_loop(&mut session, token.clone()).await,
            Command::Generate { .. } => {
                let text = instruction.as_deref().unwrap_or_default();
                let out = session.step(text).await;
                println!("\n{}", out.answer);
                Ok(())
            }
            Command::Execute { watch: false } => {
                let out = session.step(EXECUTOR_TRIGGER).await;
                println!("\n{}", out.answer);
                Ok(())
            }
            Command::Execute { watch: true } => watch_loop(&mut session, &cfg, token.clone()).await,
            Command::Plans => Ok(()),
        }
    })
    .await;

    if manager.is_shutdown() {
        match reasons.try_recv() {
            Ok(reason) => println!("\nInterrupted ({reason}), connections closed."),
            Err(_) => println!("\nInterrupted, connections closed."),
        }
    }
    result
}

async fn prompt_line(prompt: &str) -> anyhow::Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    Ok(lines
        .next_line()
        .await?
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty()))
}

/// 只有等待输入时响应关闭信号；进行中的一轮推理由循环自己观察令牌
async fn chat_loop(session: &mut AgentSession, token: CancellationToken) -> anyhow::Result<()> {
    println!("tandem chat. Type 'quit' to exit, '/reset' to clear the conversation.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\nYou: ").await?;
        stdout.flush().await?;
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "quit" | "exit" => break,
            "/reset" => {
                session.reset();
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }
        let out = session.step(input).await;
        println!("\nAssistant: {}", out.answer);
    }
    Ok(())
}

/// 执行端轮询：每个计划只触发一次；已处理的计划被放开，以便发现更新的计划
async fn watch_loop(session: &mut AgentSession, cfg: &AppConfig, token: CancellationToken) -> anyhow::Result<()> {
    let pipeline = session
        .pipeline()
        .cloned()
        .context("Executor session has no pipeline")?;
    let interval = Duration::from_secs(cfg.pipeline.poll_interval_secs.max(1));
    let mut handled: HashSet<String> = HashSet::new();
    println!("Watching {} for ready plans...", cfg.app.plans_dir.display());

    while !token.is_cancelled() {
        let ready = {
            let mut guard = pipeline.lock().await;
            match guard.poll_for_ready_plan() {
                PollOutcome::Ready(plan) if handled.contains(&plan.id) || plan.pending_count() == 0 => {
                    guard.release_active();
                    None
                }
                PollOutcome::Ready(plan) => Some(plan),
                PollOutcome::Idle => None,
            }
        };

        match ready {
            Some(plan) => {
                println!("\nLoaded plan '{}' ({} pending tasks)", plan.title, plan.pending_count());
                handled.insert(plan.id);
                let out = session.step(EXECUTOR_TRIGGER).await;
                println!("\n{}", out.answer);
                session.reset();
            }
            None => {
                tracing::debug!("No plan ready, waiting");
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
    }
    Ok(())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<ReactEvent>) {
    while let Some(ev) = rx.recv().await {
        match ev {
            ReactEvent::ToolCall { tool, server, args, .. } => {
                let server = server.as_deref().unwrap_or("?");
                println!("  -> {server}/{tool} {args}");
            }
            ReactEvent::Observation { tool, success, preview, .. } => {
                let mark = if success { "ok" } else { "failed" };
                println!("  <- {tool} [{mark}] {preview}");
            }
            ReactEvent::ThinkingContent { text } => println!("  .. {text}"),
            ReactEvent::BudgetExhausted { max_steps } => println!("  !! stopped after {max_steps} steps"),
            ReactEvent::Error { text } => eprintln!("  !! {text}"),
            _ => {}
        }
    }
}

fn print_plans(cfg: &AppConfig) -> anyhow::Result<()> {
    let store = JsonPlanStore::new(&cfg.app.plans_dir);
    let mut plans = store.list().context("Failed to read plans")?;
    plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if plans.is_empty() {
        println!("No plans in {}", cfg.app.plans_dir.display());
        return Ok(());
    }
    for plan in plans {
        let progress = plan.progress();
        println!(
            "{}  {:<20} {:>6}  {}/{}  {}",
            plan.id, plan.status.as_str(), progress.completion_rate, progress.completed, progress.total, plan.title
        );
    }
    Ok(())
}
