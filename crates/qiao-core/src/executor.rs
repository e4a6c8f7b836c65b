//! 单工作线程执行器.
//!
//! 所有任务在同一个工作线程上按投递顺序执行, 用于把状态机的修改串行化到一个线程上,
//! 同时允许其他线程投递任务:
//! - `post`: 投递后立即返回, 不关心结果
//! - `send`: 投递一个会在完成时发出信号的闭包, 阻塞等待其执行完毕并带回结果

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, error};

use crate::{QiaoError, QiaoResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    /// 待执行任务
    jobs: VecDeque<Job>,
    /// 是否已启动且未停止
    started: bool,
    /// 工作线程 ID
    worker: Option<ThreadId>,
}

struct Shared {
    state: Mutex<QueueState>,
    /// 新任务到达或停止请求
    work: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 单工作线程执行器
///
/// # 示例
/// ```
/// use qiao_core::executor::Executor;
///
/// let exec = Executor::spawn("worker").unwrap();
/// exec.post(|| println!("fire and forget")).unwrap();
/// let answer = exec.send(|| 6 * 7).unwrap();
/// assert_eq!(answer, 42);
/// exec.stop();
/// ```
pub struct Executor {
    name: String,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// 创建执行器 (尚未启动工作线程)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    started: false,
                    worker: None,
                }),
                work: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// 创建并立即启动执行器
    pub fn spawn(name: impl Into<String>) -> QiaoResult<Self> {
        let executor = Self::new(name);
        executor.start()?;
        Ok(executor)
    }

    /// 执行器名称 (同时用作工作线程名)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 启动工作线程
    pub fn start(&self) -> QiaoResult<()> {
        let mut state = self.shared.lock();
        if state.started {
            return Err(QiaoError::InvalidState(format!(
                "执行器 {} 已经启动",
                self.name
            )));
        }

        let shared = Arc::clone(&self.shared);
        // 持有锁期间启动线程, 工作线程在 started 置位之后才能进入循环
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_loop(&shared))
            .map_err(|err| {
                error!("创建执行器线程 {} 失败: {}", self.name, err);
                QiaoError::Io(err)
            })?;

        state.started = true;
        state.worker = Some(handle.thread().id());
        drop(state);

        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!("执行器 {} 已启动", self.name);
        Ok(())
    }

    /// 投递任务, 立即返回
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> QiaoResult<()> {
        let mut state = self.shared.lock();
        if !state.started {
            error!("{}: 执行器未运行 (未启动或已停止), 拒绝投递任务", self.name);
            return Err(QiaoError::ExecutorStopped(format!(
                "{}: 执行器未运行, 无法 post",
                self.name
            )));
        }
        state.jobs.push_back(Box::new(job));
        self.shared.work.notify_one();
        Ok(())
    }

    /// 投递任务并等待其执行完毕, 返回任务结果
    ///
    /// 在工作线程内部调用时直接就地执行, 避免自我等待造成死锁.
    /// 任务发生 panic 时返回 [`QiaoError::Internal`].
    pub fn send<R, F>(&self, f: F) -> QiaoResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }

        let completion = Arc::new(Completion::new());
        let signal = CompletionSignal(Arc::clone(&completion));
        self.post(move || signal.complete(f()))?;

        completion.wait().ok_or_else(|| {
            QiaoError::Internal(format!("{}: send 任务未正常完成", self.name))
        })
    }

    /// 当前线程是否为本执行器的工作线程
    pub fn is_current(&self) -> bool {
        self.shared.lock().worker == Some(thread::current().id())
    }

    /// 停止执行器
    ///
    /// 已投递的任务全部执行完毕后工作线程才退出. 重复调用无副作用.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock();
            if !state.started {
                return;
            }
            state.started = false;
            self.shared.work.notify_all();
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                error!("{}: 不能在工作线程内部 stop(), 线程将自行退出", self.name);
                return;
            }
            if handle.join().is_err() {
                error!("{}: 工作线程异常退出", self.name);
            }
        }

        let mut state = self.shared.lock();
        state.worker = None;
        debug_assert!(state.jobs.is_empty());
        debug!("执行器 {} 已停止", self.name);
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if !state.started {
                    return;
                }
                state = shared
                    .work
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("执行器任务发生 panic");
        }
    }
}

/// `send` 的完成状态: (是否结束, 结果)
struct Completion<R> {
    state: Mutex<(bool, Option<R>)>,
    done: Condvar,
}

impl<R> Completion<R> {
    fn new() -> Self {
        Self {
            state: Mutex::new((false, None)),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> Option<R> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.0 {
            state = self
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.1.take()
    }
}

/// 完成信号, 析构时唤醒等待方 (任务 panic 时同样会析构)
struct CompletionSignal<R>(Arc<Completion<R>>);

impl<R> CompletionSignal<R> {
    fn complete(self, value: R) {
        self.0
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1 = Some(value);
    }
}

impl<R> Drop for CompletionSignal<R> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.0 = true;
        self.0.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_post_preserves_order() {
        let exec = Executor::spawn("order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let seen = Arc::clone(&seen);
            exec.post(move || seen.lock().unwrap().push(i)).unwrap();
        }
        exec.send(|| ()).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_send_returns_value() {
        let exec = Executor::spawn("value").unwrap();
        assert_eq!(exec.send(|| 6 * 7).unwrap(), 42);
        assert!(!exec.is_current());
    }

    #[test]
    fn test_send_runs_on_worker_thread() {
        let exec = Executor::spawn("thread-name").unwrap();
        let name = exec
            .send(|| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("thread-name"));
    }

    #[test]
    fn test_stop_drains_posted_jobs() {
        let exec = Executor::spawn("drain").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            exec.post(move || {
                thread::sleep(Duration::from_millis(2));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        exec.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_post_and_send_after_stop_fail() {
        let exec = Executor::spawn("stopped").unwrap();
        exec.stop();
        assert!(matches!(exec.post(|| ()), Err(QiaoError::ExecutorStopped(_))));
        assert!(matches!(exec.send(|| 1), Err(QiaoError::ExecutorStopped(_))));
    }

    #[test]
    fn test_start_twice_rejected() {
        let exec = Executor::new("twice");
        assert!(exec.post(|| ()).is_err());
        exec.start().unwrap();
        assert!(matches!(exec.start(), Err(QiaoError::InvalidState(_))));
    }

    #[test]
    fn test_post_rejected_when_not_running() {
        let never_started = Executor::new("idle");
        assert!(matches!(
            never_started.post(|| ()),
            Err(QiaoError::ExecutorStopped(_))
        ));

        let stopped = Executor::spawn("stopped").unwrap();
        stopped.stop();
        assert!(matches!(stopped.post(|| ()), Err(QiaoError::ExecutorStopped(_))));
        assert!(matches!(stopped.send(|| ()), Err(QiaoError::ExecutorStopped(_))));
    }

    #[test]
    fn test_restart_after_stop() {
        let exec = Executor::spawn("restart").unwrap();
        exec.stop();
        exec.start().unwrap();
        assert_eq!(exec.send(|| "again").unwrap(), "again");
    }

    #[test]
    fn test_send_from_worker_runs_inline() {
        let exec = Arc::new(Executor::spawn("inline").unwrap());
        let inner = Arc::clone(&exec);
        let nested = exec
            .send(move || inner.send(|| 7).map(|v| v + 1))
            .unwrap();
        assert_eq!(nested.unwrap(), 8);
        exec.stop();
    }

    #[test]
    fn test_send_panicking_job_reports_error() {
        let exec = Executor::spawn("panic").unwrap();
        let result: QiaoResult<()> = exec.send(|| panic!("job failed"));
        assert!(matches!(result, Err(QiaoError::Internal(_))));
        // 工作线程仍然可用
        assert_eq!(exec.send(|| 1).unwrap(), 1);
    }
}
