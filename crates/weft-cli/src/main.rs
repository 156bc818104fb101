//! weft: PriorityLockedQueue を手元で動かすデモ CLI
//!
//! `--task name:KEY1,KEY2@delay_ms` を並べて投入し、全部終わるまで待ってから
//! 集計を出力します。タスクを指定しなければ組み込みのシナリオを流します。

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use weft_core::{
    HandlerError, KeyedTask, QueueBuilder, QueueConfig, ResourceTask, SpawnProcessor, TaskHandler,
};

type DemoTask = KeyedTask<String>;

/// 何も指定されなかったときのシナリオ（並列・競合・複数キー）
const DEMO_TASKS: &[&str] = &[
    "c:C@0",
    "d:D@10",
    "e1:E@0",
    "e2:E@500",
    "ghi:G,H,I@0",
    "jkl:J,K,L@500",
];

#[derive(Debug, Parser)]
#[command(name = "weft", about = "Run tasks through a resource-locked delay queue")]
struct Cli {
    /// JSON config file (name, max_concurrent, log_level)
    #[arg(long, env = "WEFT_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides log_level from the config file
    #[arg(long, env = "WEFT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Task to submit, as name:KEY1,KEY2@delay_ms (repeatable)
    #[arg(long = "task")]
    tasks: Vec<TaskArg>,

    /// Simulated work per task in milliseconds
    #[arg(long, default_value_t = 100)]
    work_ms: u64,

    /// Print final counts as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskArg {
    name: String,
    keys: Vec<String>,
    delay: Duration,
}

impl FromStr for TaskArg {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (name, rest) = raw
            .split_once(':')
            .ok_or_else(|| format!("expected name:keys[@delay_ms], got {raw:?}"))?;
        if name.is_empty() {
            return Err(format!("task name is empty in {raw:?}"));
        }

        let (keys, delay_ms) = match rest.split_once('@') {
            Some((keys, delay)) => {
                let ms = delay
                    .parse::<u64>()
                    .map_err(|e| format!("bad delay {delay:?}: {e}"))?;
                (keys, ms)
            }
            None => (rest, 0),
        };

        Ok(Self {
            name: name.to_string(),
            keys: keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
            delay: Duration::from_millis(delay_ms),
        })
    }
}

/// 指定時間眠るだけの handler（ref 更新などの代わり）
struct SleepHandler {
    work: Duration,
}

#[async_trait]
impl TaskHandler<DemoTask> for SleepHandler {
    async fn handle(&self, task: &DemoTask) -> Result<(), HandlerError> {
        tracing::info!(task = task.name(), keys = ?task.resources(), "working");
        tokio::time::sleep(self.work).await;
        tracing::info!(task = task.name(), "done");
        Ok(())
    }
}

/// RUST_LOG があればそれを優先し、無ければ設定の log_level を使う
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // (A) 設定: ファイル → CLI 引数の順で上書き
    let mut config = match &cli.config {
        Some(path) => QueueConfig::load(path)?,
        None => QueueConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_tracing(&config.log_level);

    let tasks = if cli.tasks.is_empty() {
        DEMO_TASKS
            .iter()
            .map(|raw| raw.parse())
            .collect::<Result<Vec<TaskArg>, _>>()?
    } else {
        cli.tasks
    };

    // (B) processor とキューを組み立てて timer driver を起動
    let handler = SleepHandler {
        work: Duration::from_millis(cli.work_ms),
    };
    let processor = SpawnProcessor::<DemoTask, _>::new(handler, config.max_concurrent)?;
    let queue = QueueBuilder::new(processor).config(config).build()?;
    queue.start()?;

    // (C) 投入
    for task in tasks {
        let id = queue.schedule(KeyedTask::new(task.name.clone(), task.keys), task.delay)?;
        tracing::debug!(task_id = %id, task = %task.name, "submitted");
    }

    // (D) 全タスクの完了を待つ
    queue.wait_idle().await;
    let counts = queue.counts_by_state();
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
    } else {
        tracing::info!(queue = queue.name(), completed = counts.completed, "all tasks processed");
    }

    // (E) graceful shutdown
    queue.shutdown_and_join().await;
    Ok(())
}
