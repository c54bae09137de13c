use crate::source::Dataset;

/// 广播总线上的消息：加载任务与界面之间唯一的通信方式。
#[derive(Debug, Clone)]
pub enum Command {
    DatasetLoaded(Dataset),
    Error(String),
    Exit,
}
