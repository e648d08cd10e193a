use std::borrow::Cow;

/// Events emitted while a tomogram is being expanded or catalogued.
///
/// The library never prints; callers receive these through a [`ProgressReporter`] and decide
/// how to render them.
#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: Cow<'static, str> },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    RoundFinished { index: usize, accepted: usize },
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}
