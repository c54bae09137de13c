mod command;
mod config;
mod error_log;
mod query;
mod record;
mod source;
mod stats;
mod store;
mod tui;

use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::broadcast;
use tokio::task;

use crate::command::Command;
use crate::config::{CliParams, DatasetSpec};
use crate::error_log::{ErrorLogStore, FailureStage};
use crate::source::DatasetFetcher;
use crate::store::RecordStore;
use crate::tui::TuiApp;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let param = CliParams::parse();
    let (tx, mut rx) = broadcast::channel::<Command>(16);
    let error_log = ErrorLogStore::new(
        param
            .error_log
            .clone()
            .unwrap_or_else(ErrorLogStore::default_path),
    );

    let store =
        RecordStore::new(param.initial_query_state()).map_err(|err| anyhow!(err.to_string()))?;

    let loader_param = param.clone();
    let loader_tx = tx.clone();
    let loader_log = error_log.clone();
    task::spawn(async move {
        if let Err(err) = run_loader(loader_param, loader_tx.clone(), loader_log.clone()).await {
            let _ = loader_log.append(FailureStage::LoaderExit, err.to_string());
            let _ = loader_tx.send(Command::Error(format!("数据加载任务退出: {err}")));
        }
    });

    let mut app = TuiApp::new(store, param.summary_field.clone());
    let app_result = tokio::select! {
        result = app.run(&mut rx) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    let _ = tx.send(Command::Exit);
    app.dispose();
    app_result.map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

enum Loader {
    Remote(DatasetFetcher, String),
    File(PathBuf),
    Sample,
}

/// 加载一次数据集；配置了 --refresh 时按间隔整体重载。
/// 失败会写入错误日志并广播给界面；只有显式允许时才回退演示数据，
/// 且回退后界面会标明来源，绝不冒充实时数据。
async fn run_loader(
    param: CliParams,
    tx: broadcast::Sender<Command>,
    error_log: ErrorLogStore,
) -> Result<(), anyhow::Error> {
    let loader = match param.dataset_spec() {
        DatasetSpec::Endpoint(endpoint) => Loader::Remote(DatasetFetcher::new()?, endpoint),
        DatasetSpec::CsvFile(path) => Loader::File(path),
        DatasetSpec::Sample => Loader::Sample,
    };
    let refresh = param.refresh_interval();
    loop {
        let result = match &loader {
            Loader::Remote(fetcher, endpoint) => fetcher.fetch(endpoint).await,
            Loader::File(path) => source::load_csv_file(path),
            Loader::Sample => Ok(source::sample_dataset()),
        };
        match result {
            Ok(dataset) => {
                let _ = tx.send(Command::DatasetLoaded(dataset));
            }
            Err(err) => {
                let _ = error_log.append(FailureStage::Fetch, format!("{err:#}"));
                let _ = tx.send(Command::Error(format!("数据加载失败: {err}")));
                if param.sample_fallback_allowed() {
                    let _ = tx.send(Command::DatasetLoaded(source::sample_dataset()));
                }
            }
        }
        match refresh {
            Some(interval) => tokio::time::sleep(interval).await,
            None => return Ok(()),
        }
    }
}
