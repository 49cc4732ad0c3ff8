use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

/// Fires once after `after_ms`. `id` lets the core ignore superseded timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerOperation {
    pub id: u64,
    pub after_ms: u64,
}

impl Operation for TimerOperation {
    type Output = ();
}

pub struct Timer<Ev> {
    context: CapabilityContext<TimerOperation, Ev>,
}

impl<Ev> Capability<Ev> for Timer<Ev> {
    type Operation = TimerOperation;
    type MappedSelf<MappedEv> = Timer<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Timer::new(self.context.map_event(f))
    }
}

impl<Ev> Timer<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<TimerOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn start<F>(&self, operation: TimerOperation, make_event: F)
    where
        F: FnOnce(()) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.request_from_shell(operation).await;
            context.update_app(make_event(()));
        });
    }
}
