use crate::cs::memory::Domain;
use crate::cs::registers::RegisterTranslator;
use crate::cs::space::{SpaceAccountant, SpaceBudget};
use crate::cs::stream::CommandStream;
use crate::cs::submit::SubmitTarget;
use crate::error::{CsError, CsResult};

/// Dwords in a command buffer unless configured otherwise (64 KiB).
pub const DEFAULT_CAPACITY_DWORDS: usize = 16 * 1024;

/// Configures a [`CommandStream`].
///
/// ```ignore
/// let cs = CommandStream::builder(DrmSubmitter::new(&device))
///     .capacity_dwords(4096)
///     .budget(SpaceBudget::from_gem_info(&device.gem_info()?))
///     .build()?;
/// ```
pub struct CommandStreamBuilder {
    target: Box<dyn SubmitTarget>,
    capacity: usize,
    budget: SpaceBudget,
    translator: RegisterTranslator,
    on_flush: Option<Box<dyn FnMut()>>,
}

impl CommandStreamBuilder {
    pub fn new(target: impl SubmitTarget + 'static) -> Self {
        Self {
            target: Box::new(target),
            capacity: DEFAULT_CAPACITY_DWORDS,
            budget: SpaceBudget::new(),
            translator: RegisterTranslator::r600(),
            on_flush: None,
        }
    }

    #[must_use]
    pub fn capacity_dwords(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the ceiling for one domain, keeping the others.
    #[must_use]
    pub fn limit(mut self, domain: Domain, bytes: u64) -> Self {
        self.budget.set_limit(domain, bytes);
        self
    }

    /// Replaces the whole budget.
    #[must_use]
    pub fn budget(mut self, budget: SpaceBudget) -> Self {
        self.budget = budget;
        self
    }

    #[must_use]
    pub fn translator(mut self, translator: RegisterTranslator) -> Self {
        self.translator = translator;
        self
    }

    #[must_use]
    pub fn on_flush(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_flush = Some(Box::new(callback));
        self
    }

    /// # Errors
    /// `InvalidState` if the capacity cannot hold a header and one payload dword.
    pub fn build(self) -> CsResult<CommandStream> {
        if self.capacity < 2 {
            return Err(CsError::InvalidState(
                "command buffer capacity must be at least 2 dwords",
            ));
        }

        log::debug!(
            "CS: new stream, {} dwords, VRAM limit {:?}, GTT limit {:?}",
            self.capacity,
            self.budget.limit(Domain::Vram),
            self.budget.limit(Domain::Gtt)
        );

        Ok(CommandStream::from_parts(
            self.capacity,
            SpaceAccountant::new(self.budget),
            self.translator,
            self.target,
            self.on_flush,
        ))
    }
}
