//! 调用上下文：取消令牌 + 可选截止时间。子上下文随父上下文一起取消。

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// 永不取消的根上下文。
    pub fn background() -> Self {
        Self::default()
    }

    /// 派生可独立取消的子上下文。
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 截止时间取父子中较早者。
    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < at => parent,
            _ => at,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// 已取消返回 `Cancelled`，已超时返回 `DeadlineExceeded`，否则 `None`。
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// 取消或到期时完成。
    pub async fn done(&self) {
        match self.deadline {
            Some(at) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(at) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// 运行 `fut`，上下文先结束时放弃它并返回对应错误。
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            _ = self.done() => Err(self.err().unwrap_or(Error::Cancelled)),
            r = fut => r,
        }
    }

    /// 睡眠 `d`，期间上下文结束则提前返回错误。
    pub async fn sleep(&self, d: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(d).await;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::Context;
    use crate::error::Error;
    use std::time::Duration;

    #[tokio::test]
    async fn child_is_cancelled_with_parent() {
        let parent = Context::background();
        let child = parent.child();
        assert!(!child.is_done());
        parent.cancel();
        child.done().await;
        assert!(matches!(child.err(), Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let r = ctx.sleep(Duration::from_secs(5)).await;
        assert!(matches!(r, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_never_extends_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
