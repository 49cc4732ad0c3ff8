use crux_core::capability::{Capability, CapabilityContext};

use crate::image_processing::{CompressOperation, CompressResult};

/// Decoding and re-encoding photos is CPU heavy, so shells run it off the
/// UI thread (see [`crate::image_processing::ImageCompressor`]).
pub struct Compress<Ev> {
    context: CapabilityContext<CompressOperation, Ev>,
}

impl<Ev> Capability<Ev> for Compress<Ev> {
    type Operation = CompressOperation;
    type MappedSelf<MappedEv> = Compress<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Compress::new(self.context.map_event(f))
    }
}

impl<Ev> Compress<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<CompressOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn run<F>(&self, operation: CompressOperation, make_event: F)
    where
        F: FnOnce(CompressResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}
