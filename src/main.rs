use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::Parser;
use bucketfs::config::MountConfig;
use bucketfs::fs::ObjectFs;
use bucketfs::fuse::FuseAdapter;
use bucketfs::storage::{LocalObjectStore, ObjectStore};
use tokio::runtime::Handle;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "把对象存储 bucket 挂载为文件系统", long_about = None)]
struct Args {
    /// 挂载点路径
    #[arg(short, long)]
    mount: PathBuf,

    /// bucket 目录（本地目录模拟的对象存储）
    #[arg(short, long)]
    bucket: PathBuf,

    /// 配置文件（JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 只读挂载
    #[arg(long)]
    read_only: bool,

    /// 允许其他用户访问
    #[arg(long)]
    allow_other: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MountConfig::load(path)?,
        None => MountConfig::default(),
    };
    if args.read_only {
        config.read_only = true;
    }
    if args.allow_other {
        config.allow_other = true;
    }
    info!(
        "初始化文件系统，挂载点={:?}, bucket={:?}, 只读={}",
        args.mount, args.bucket, config.read_only
    );

    // 确保挂载点目录存在
    if !args.mount.exists() {
        info!("创建挂载点目录: {:?}", args.mount);
        std::fs::create_dir_all(&args.mount)
            .with_context(|| format!("创建挂载点目录失败: {:?}", args.mount))?;
    }
    if !args.bucket.is_dir() {
        anyhow::bail!("bucket 目录不存在: {:?}", args.bucket);
    }

    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(args.bucket.clone()));
    let fs = ObjectFs::mount(store, &config)
        .await
        .context("加载 bucket 元数据失败")?;

    let adapter = FuseAdapter::new(Arc::new(fs), Handle::current(), &config);
    let session = adapter
        .mount(&args.mount, &config)
        .with_context(|| format!("挂载文件系统失败: {:?}", args.mount))?;
    info!("文件系统挂载成功: {:?}", args.mount);

    // 等待中断信号
    info!("等待中断信号...");
    signal::ctrl_c().await.context("无法监听 Ctrl+C 信号")?;
    info!("接收到中断信号，准备卸载文件系统...");

    // drop 会话即卸载并等待 FUSE 线程退出
    tokio::task::spawn_blocking(move || drop(session)).await?;
    info!("文件系统已卸载");
    Ok(())
}
