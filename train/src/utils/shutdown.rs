use crate::common::*;

/// A flag raised once an interrupt is requested.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag on Ctrl-C.
    pub fn install_ctrl_c(&self, handle: &Handle) {
        let flag = self.clone();
        handle.spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupt received, stopping after the current epoch");
                    flag.request();
                }
                Err(err) => warn!("unable to listen for Ctrl-C: {}", err),
            }
        });
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
