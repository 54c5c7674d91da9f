use crate::logger::Verbosity;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 测试根目录
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// 只运行文件路径或测试名包含该子串的测试
    #[arg(short = 'k', long)]
    pub filter: Option<String>,

    /// 只运行带有该标签的测试（可重复）
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,

    /// 显示每个测试的日志和产物
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// 只输出一行摘要
    #[arg(short, long)]
    pub quiet: bool,

    /// 不输出耗时预估
    #[arg(long)]
    pub no_estimates: bool,

    /// 不写回 .rutest.json
    #[arg(long)]
    pub no_store: bool,

    /// 把完整报告写入 JSON 文件
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// 以表格显示结果
    #[arg(long)]
    pub table: bool,

    /// `--` 之后的参数原样传给测试
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}
