//! 协作式取消.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EstimateError, EstimateResult};

/// 可跨线程共享的取消标记.
///
/// 估计流程只在每个模拟开始之前检查一次, 已经开始的网络调用不会被打断.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// 创建一个未取消的标记.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求取消. 对所有克隆生效.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// 是否已请求取消.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// 已取消时返回 [`EstimateError::Cancelled`].
    #[inline]
    pub(crate) fn check(&self, completed: usize) -> EstimateResult<()> {
        if self.is_cancelled() {
            Err(EstimateError::Cancelled { completed })
        } else {
            Ok(())
        }
    }
}
