use crate::cs::builder::CommandStreamBuilder;
use crate::cs::memory::{Domain, Domains, SharedBuffer};
use crate::cs::packet::PacketKind;
use crate::cs::registers::{IT_CONTEXT_CONTROL, IT_NOP, RegisterTranslator};
use crate::cs::reloc::{AddressWidth, ReferencedBuffer, RelocationEntry, RelocationTable};
use crate::cs::space::{SpaceAccountant, SpaceBudget};
use crate::cs::submit::{Submission, SubmitTarget};
use crate::drm::ioctl::CS_RELOC_DWORDS;
use crate::error::{CsError, CsResult};

/// `NOP` header plus relocation index.
const RELOC_PACKET_DWORDS: usize = 2;

/// Fixed-capacity dword buffer. The write cursor is the current length.
#[derive(Debug)]
pub struct CommandBuffer {
    dwords: Vec<u32>,
    capacity: usize,
}

impl CommandBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            dwords: Vec::with_capacity(capacity),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dwords.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dwords.is_empty()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.dwords.len()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.dwords
    }

    // Callers reserve space before pushing.
    fn push(&mut self, value: u32) {
        debug_assert!(self.dwords.len() < self.capacity);
        self.dwords.push(value);
    }

    fn truncate(&mut self, len: usize) {
        self.dwords.truncate(len);
    }

    fn clear(&mut self) {
        self.dwords.clear();
    }
}

/// The packet currently being written.
#[derive(Debug, Clone, Copy)]
struct Transaction {
    kind: PacketKind,
    declared: usize,
    written: usize,
    /// Dword offset of the header.
    start: usize,
    /// Relocation count when the packet was opened.
    reloc_mark: usize,
}

impl Transaction {
    fn unwritten(&self) -> usize {
        self.declared - self.written
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamState {
    Idle,
    Building(Transaction),
}

/// Builds a radeon command stream and submits it to a [`SubmitTarget`].
///
/// Packets are written as transactions: [`begin_packet`](Self::begin_packet) declares the
/// payload size and reserves room for it (flushing first if the buffer is too full),
/// [`write_dword`](Self::write_dword) fills it, and [`end_packet`](Self::end_packet) checks
/// the declared size was honoured. A packet is never split across two submissions.
///
/// If the target [wants relocation packets](SubmitTarget::wants_reloc_packets), closing a
/// packet also appends one `NOP` packet per relocation recorded inside it. These follow the
/// declared payload and are not counted in it.
///
/// Dropping the stream discards anything not yet flushed.
pub struct CommandStream {
    buffer: CommandBuffer,
    state: StreamState,
    relocs: RelocationTable,
    space: SpaceAccountant,
    translator: RegisterTranslator,
    target: Box<dyn SubmitTarget>,
    on_flush: Option<Box<dyn FnMut()>>,
    flush_count: u64,
    /// Dwords appended after a packet for each relocation it records.
    reloc_packet_dwords: usize,
}

impl std::fmt::Debug for CommandStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStream")
            .field("buffer", &self.buffer)
            .field("state", &self.state)
            .field("relocs", &self.relocs)
            .field("space", &self.space)
            .field("flush_count", &self.flush_count)
            .finish_non_exhaustive()
    }
}

impl CommandStream {
    pub fn builder(target: impl SubmitTarget + 'static) -> CommandStreamBuilder {
        CommandStreamBuilder::new(target)
    }

    pub(crate) fn from_parts(
        capacity: usize,
        space: SpaceAccountant,
        translator: RegisterTranslator,
        target: Box<dyn SubmitTarget>,
        on_flush: Option<Box<dyn FnMut()>>,
    ) -> Self {
        let reloc_packet_dwords = if target.wants_reloc_packets() {
            RELOC_PACKET_DWORDS
        } else {
            0
        };
        Self {
            buffer: CommandBuffer::new(capacity),
            state: StreamState::Idle,
            relocs: RelocationTable::new(),
            space,
            translator,
            target,
            on_flush,
            flush_count: 0,
            reloc_packet_dwords,
        }
    }

    // ===========================================================================================
    // Packet Transactions
    // ===========================================================================================

    /// Opens a packet carrying `count` payload dwords and writes its header.
    ///
    /// If the header and payload do not fit in the remaining space, the stream is flushed
    /// first and the packet starts at offset 0 of the fresh buffer.
    ///
    /// # Errors
    /// - `InvalidState` if a packet is already open.
    /// - `InvalidPacketSize` if `count` is 0 or exceeds the 14-bit count field.
    /// - `CapacityExceeded` if the packet would not fit even in an empty buffer.
    /// - Any error of the implicit [`flush`](Self::flush).
    pub fn begin_packet(&mut self, kind: PacketKind, count: usize) -> CsResult<()> {
        self.begin_packet_with_relocs(kind, count, 0)
    }

    /// Like [`begin_packet`](Self::begin_packet), also reserving room for the relocation
    /// packets of `relocs` relocations the packet will record.
    ///
    /// Without a reservation a relocation still succeeds while the buffer has room left.
    pub fn begin_packet_with_relocs(
        &mut self,
        kind: PacketKind,
        count: usize,
        relocs: usize,
    ) -> CsResult<()> {
        if matches!(self.state, StreamState::Building(_)) {
            return Err(CsError::InvalidState("begin_packet while a packet is open"));
        }

        let header = kind.header(count)?;
        let needed = count + 1 + relocs * self.reloc_packet_dwords;

        if needed > self.buffer.capacity() {
            return Err(CsError::CapacityExceeded {
                declared: count,
                capacity: self.buffer.capacity(),
            });
        }

        if needed > self.buffer.remaining() {
            log::debug!(
                "CS: {needed} dwords needed, {} left; flushing",
                self.buffer.remaining()
            );
            self.flush()?;
        }

        let start = self.buffer.len();
        self.buffer.push(header);
        self.state = StreamState::Building(Transaction {
            kind,
            declared: count,
            written: 0,
            start,
            reloc_mark: self.relocs.len(),
        });

        log::trace!("CS: begin {kind:?} x{count} at dword {start}");
        Ok(())
    }

    /// Appends one payload dword to the open packet.
    ///
    /// # Errors
    /// `InvalidState` outside a packet; `TransactionMismatch` if the packet is already full.
    pub fn write_dword(&mut self, value: u32) -> CsResult<()> {
        let tx = self.open_transaction(1)?;
        tx.written += 1;
        self.buffer.push(value);
        Ok(())
    }

    pub fn write_dwords(&mut self, values: &[u32]) -> CsResult<()> {
        let tx = self.open_transaction(values.len())?;
        tx.written += values.len();
        for &v in values {
            self.buffer.push(v);
        }
        Ok(())
    }

    /// Closes the open packet.
    ///
    /// # Errors
    /// `InvalidState` outside a packet. `TransactionMismatch` if fewer dwords were written
    /// than declared; the partial packet and any relocations it recorded are discarded.
    pub fn end_packet(&mut self) -> CsResult<()> {
        let StreamState::Building(tx) = self.state else {
            return Err(CsError::InvalidState("end_packet without an open packet"));
        };
        self.state = StreamState::Idle;

        if tx.written != tx.declared {
            log::error!(
                "CS: {:?} declared {} dwords, wrote {}; discarding packet",
                tx.kind,
                tx.declared,
                tx.written
            );
            self.rollback(&tx);
            return Err(CsError::TransactionMismatch {
                declared: tx.declared,
                written: tx.written,
            });
        }

        if self.reloc_packet_dwords > 0 {
            let nop = PacketKind::Type3 { opcode: IT_NOP }.header(1)?;
            for entry in &self.relocs.entries()[tx.reloc_mark..] {
                #[allow(clippy::cast_possible_truncation)]
                let index = entry.buffer_index as u32 * CS_RELOC_DWORDS;
                self.buffer.push(nop);
                self.buffer.push(index);
            }
        }
        Ok(())
    }

    /// Writes a whole type-3 packet.
    pub fn packet3(&mut self, opcode: u8, payload: &[u32]) -> CsResult<()> {
        self.begin_packet(PacketKind::Type3 { opcode }, payload.len())?;
        self.write_dwords(payload)?;
        self.end_packet()
    }

    /// Writes a whole type-0 packet: `values` go to consecutive registers from `base_index`.
    pub fn packet0(&mut self, base_index: u16, values: &[u32]) -> CsResult<()> {
        self.begin_packet(PacketKind::Type0 { base_index }, values.len())?;
        self.write_dwords(values)?;
        self.end_packet()
    }

    fn open_transaction(&mut self, extra: usize) -> CsResult<&mut Transaction> {
        let StreamState::Building(tx) = &mut self.state else {
            return Err(CsError::InvalidState("write outside of a packet"));
        };
        if tx.written + extra > tx.declared {
            return Err(CsError::TransactionMismatch {
                declared: tx.declared,
                written: tx.written + extra,
            });
        }
        Ok(tx)
    }

    fn rollback(&mut self, tx: &Transaction) {
        self.buffer.truncate(tx.start);
        if self.relocs.len() > tx.reloc_mark {
            self.relocs.truncate(tx.reloc_mark);
            self.resync_referenced();
        }
    }

    fn resync_referenced(&mut self) {
        self.space.clear_referenced();
        for b in self.relocs.buffers() {
            self.space
                .add_referenced(&b.buffer, b.read_domains | b.write_domains);
        }
    }

    // ===========================================================================================
    // Register Writes
    // ===========================================================================================

    /// Sets one register with the `SET_*` opcode of its window.
    ///
    /// # Errors
    /// `UnmappedRegister` if `address` lies outside every window.
    pub fn set_register(&mut self, address: u32, value: u32) -> CsResult<()> {
        self.set_registers(address, &[value])
    }

    /// Sets `values.len()` consecutive registers starting at `address` in one packet.
    ///
    /// # Errors
    /// `UnmappedRegister` if `address` lies outside every window; `InvalidPacketSize` if
    /// `values` is empty.
    pub fn set_registers(&mut self, address: u32, values: &[u32]) -> CsResult<()> {
        let opcode = self
            .translator
            .lookup(address)
            .ok_or(CsError::UnmappedRegister(address))?
            .category
            .set_opcode();
        self.set_registers_with(opcode, address, values)
    }

    /// Like [`set_register`](Self::set_register) with an explicit opcode.
    pub fn set_register_with(&mut self, opcode: u8, address: u32, value: u32) -> CsResult<()> {
        self.set_registers_with(opcode, address, &[value])
    }

    pub fn set_registers_with(&mut self, opcode: u8, address: u32, values: &[u32]) -> CsResult<()> {
        if values.is_empty() {
            return Err(CsError::InvalidPacketSize(0));
        }
        let index = self.translator.translate(address);

        self.begin_packet(PacketKind::Type3 { opcode }, values.len() + 1)?;
        self.write_dword(index)?;
        self.write_dwords(values)?;
        self.end_packet()
    }

    /// Enables state loading and shadowing: the start-3D packet.
    pub fn context_control(&mut self) -> CsResult<()> {
        self.packet3(IT_CONTEXT_CONTROL, &[0x8000_0000, 0x8000_0000])
    }

    // ===========================================================================================
    // Buffer References
    // ===========================================================================================

    /// Writes a one-dword GPU address placeholder for `buffer` into the open packet.
    ///
    /// The placeholder is patched with the buffer's address at flush time.
    ///
    /// # Errors
    /// `InvalidState` outside a packet, `TransactionMismatch` if the packet is full, or
    /// `Relocation(Unsupported)` if the buffer cannot be submitted.
    pub fn add_relocation(
        &mut self,
        buffer: &SharedBuffer,
        read_domains: Domains,
        write_domains: Domains,
    ) -> CsResult<()> {
        self.relocate(buffer, read_domains, write_domains, AddressWidth::Dword)
    }

    /// Two-dword (low, high) variant of [`add_relocation`](Self::add_relocation).
    pub fn add_relocation_wide(
        &mut self,
        buffer: &SharedBuffer,
        read_domains: Domains,
        write_domains: Domains,
    ) -> CsResult<()> {
        self.relocate(buffer, read_domains, write_domains, AddressWidth::Qword)
    }

    fn relocate(
        &mut self,
        buffer: &SharedBuffer,
        read_domains: Domains,
        write_domains: Domains,
        width: AddressWidth,
    ) -> CsResult<()> {
        let words = width.dwords();
        let tx = *self.open_transaction(words)?;

        // Room for this relocation packet and those already owed by the packet.
        let owed = (self.relocs.len() - tx.reloc_mark + 1) * self.reloc_packet_dwords;
        if tx.unwritten() + owed > self.buffer.remaining() {
            return Err(CsError::CapacityExceeded {
                declared: tx.declared,
                capacity: self.buffer.capacity(),
            });
        }

        let offset = self.buffer.len() * 4;
        self.relocs
            .record(buffer, offset, read_domains, write_domains, width)?;
        self.space
            .add_referenced(buffer, read_domains | write_domains);

        let tx = self.open_transaction(words)?;
        tx.written += words;
        for _ in 0..words {
            self.buffer.push(0);
        }
        Ok(())
    }

    /// Charges `buffer` against `domain` until it is removed, across flushes.
    pub fn add_persistent(&mut self, buffer: &SharedBuffer, domain: Domain) {
        self.space.add_persistent(buffer, domain);
    }

    pub fn remove_persistent(&mut self, buffer: &SharedBuffer) -> bool {
        self.space.remove_persistent(buffer)
    }

    pub fn clear_persistent(&mut self) {
        self.space.clear_persistent();
    }

    /// Changes the ceiling of one domain for later space checks and submissions.
    pub fn set_limit(&mut self, domain: Domain, bytes: u64) {
        self.space.set_limit(domain, bytes);
    }

    pub fn set_budget(&mut self, budget: SpaceBudget) {
        self.space.set_budget(budget);
    }

    /// Checks persistent and referenced demand against the budget.
    ///
    /// Never flushes or evicts; the caller decides how to recover.
    pub fn check_space(&self) -> CsResult<()> {
        Ok(self.space.check()?)
    }

    // ===========================================================================================
    // Submission
    // ===========================================================================================

    /// Patches relocations, submits the buffer and starts a fresh one.
    ///
    /// A flush of an empty stream does nothing. On submission failure the contents are
    /// kept so the caller can retry or [`reset`](Self::reset).
    ///
    /// # Errors
    /// `InvalidState` while a packet is open, `SubmissionFailed` if the target rejects it.
    pub fn flush(&mut self) -> CsResult<()> {
        if matches!(self.state, StreamState::Building(_)) {
            return Err(CsError::InvalidState("flush while a packet is open"));
        }
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.relocs.patch(&mut self.buffer.dwords);

        let budget = self.space.budget();
        let submission = Submission {
            dwords: self.buffer.as_slice(),
            relocations: self.relocs.entries(),
            buffers: self.relocs.buffers(),
            vram_limit: budget.limit(Domain::Vram),
            gtt_limit: budget.limit(Domain::Gtt),
        };

        self.target
            .submit(&submission)
            .map_err(|e| CsError::SubmissionFailed(e.to_string()))?;

        log::debug!(
            "CS: flushed {} dwords, {} relocations over {} buffers",
            self.buffer.len(),
            self.relocs.len(),
            self.relocs.buffers().len()
        );

        self.flush_count += 1;
        if let Some(callback) = self.on_flush.as_mut() {
            callback();
        }
        self.discard_contents();
        Ok(())
    }

    /// Discards the open packet and all unflushed content without submitting it.
    ///
    /// Persistent space entries are kept.
    pub fn reset(&mut self) {
        self.state = StreamState::Idle;
        self.discard_contents();
    }

    fn discard_contents(&mut self) {
        self.buffer.clear();
        self.relocs.clear();
        self.space.clear_referenced();
    }

    /// Registers a callback run after every successful submission, including the implicit
    /// ones issued by [`begin_packet`](Self::begin_packet).
    pub fn set_flush_callback(&mut self, callback: impl FnMut() + 'static) {
        self.on_flush = Some(Box::new(callback));
    }

    // ===========================================================================================
    // Inspection
    // ===========================================================================================

    #[must_use]
    pub fn is_building(&self) -> bool {
        matches!(self.state, StreamState::Building(_))
    }

    #[must_use]
    pub fn dwords(&self) -> &[u32] {
        self.buffer.as_slice()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    #[must_use]
    pub fn relocations(&self) -> &[RelocationEntry] {
        self.relocs.entries()
    }

    #[must_use]
    pub fn referenced_buffers(&self) -> &[ReferencedBuffer] {
        self.relocs.buffers()
    }

    #[must_use]
    pub fn space(&self) -> &SpaceAccountant {
        &self.space
    }

    #[must_use]
    pub fn translator(&self) -> &RegisterTranslator {
        &self.translator
    }

    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }
}

impl Drop for CommandStream {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            log::warn!(
                "CS: discarding {} unflushed dwords ({} relocations)",
                self.buffer.len(),
                self.relocs.len()
            );
        }
    }
}
