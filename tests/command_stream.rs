use radeon_cs::cs::memory::{BufferObject, Domain, Domains, SharedBuffer};
use radeon_cs::cs::packet::{PacketKind, decode};
use radeon_cs::cs::registers::{
    DB_DEPTH_CONTROL, IT_NOP, IT_SET_CONFIG_REG, IT_SET_CONTEXT_REG, IT_SET_RESOURCE,
    RegisterCategory, SX_ALPHA_TEST_CONTROL, SX_MEMORY_EXPORT_SIZE, SX_MISC,
};
use radeon_cs::cs::reloc::RelocationError;
use radeon_cs::cs::space::{SpaceBudget, SpaceError};
use radeon_cs::cs::submit::{Submission, SubmitTarget};
use radeon_cs::{CommandStream, CsError, CsResult};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Flushed {
    dwords: Vec<u32>,
    handles: Vec<u32>,
    vram_limit: Option<u64>,
}

#[derive(Default, Clone)]
struct Recorder {
    flushes: Rc<RefCell<Vec<Flushed>>>,
    fail: Rc<Cell<bool>>,
}

impl SubmitTarget for Recorder {
    fn submit(&mut self, submission: &Submission<'_>) -> CsResult<()> {
        if self.fail.get() {
            return Err(CsError::Driver("ring is hung".into()));
        }
        self.flushes.borrow_mut().push(Flushed {
            dwords: submission.dwords.to_vec(),
            handles: submission.buffers.iter().map(|b| b.handle).collect(),
            vram_limit: submission.vram_limit,
        });
        Ok(())
    }
}

/// A target that wants a `NOP` relocation packet after each relocation, like the kernel.
#[derive(Default, Clone)]
struct KernelLike {
    inner: Recorder,
}

impl SubmitTarget for KernelLike {
    fn submit(&mut self, submission: &Submission<'_>) -> CsResult<()> {
        self.inner.submit(submission)
    }

    fn wants_reloc_packets(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct Unbacked;

impl BufferObject for Unbacked {
    fn handle(&self) -> Option<u32> {
        None
    }
    fn size(&self) -> u64 {
        4096
    }
    fn domains(&self) -> Domains {
        Domains::VRAM
    }
    fn gpu_address(&self) -> u64 {
        0
    }
}

#[derive(Debug)]
struct MockBuffer {
    handle: u32,
    size: u64,
    address: Cell<u64>,
}

impl BufferObject for MockBuffer {
    fn handle(&self) -> Option<u32> {
        Some(self.handle)
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn domains(&self) -> Domains {
        Domains::VRAM
    }
    fn gpu_address(&self) -> u64 {
        self.address.get()
    }
}

fn mock(handle: u32, size: u64, address: u64) -> (Arc<MockBuffer>, SharedBuffer) {
    let concrete = Arc::new(MockBuffer {
        handle,
        size,
        address: Cell::new(address),
    });
    let shared: SharedBuffer = concrete.clone();
    (concrete, shared)
}

fn stream(capacity: usize) -> (CommandStream, Recorder) {
    let recorder = Recorder::default();
    let cs = CommandStream::builder(recorder.clone())
        .capacity_dwords(capacity)
        .build()
        .unwrap();
    (cs, recorder)
}

#[test]
fn test_packet_grows_by_count_plus_header() {
    let (mut cs, _) = stream(64);
    for n in [1usize, 2, 5, 17] {
        let before = cs.dwords().len();
        cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, n).unwrap();
        for i in 0..n {
            cs.write_dword(i as u32).unwrap();
        }
        cs.end_packet().unwrap();

        assert_eq!(cs.dwords().len(), before + n + 1);
        let header = cs.dwords()[before];
        assert_eq!((header >> 16) & 0x3FFF, (n - 1) as u32);
    }
}

#[test]
fn test_type0_header() {
    let (mut cs, _) = stream(16);
    cs.packet0(0x1234, &[7, 8, 9]).unwrap();
    assert_eq!(cs.dwords(), &[0x0002_1234, 7, 8, 9]);
}

#[test]
fn test_auto_flush_once_then_offset_zero() {
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let recorder = Recorder::default();
    let mut cs = CommandStream::builder(recorder.clone())
        .capacity_dwords(8)
        .on_flush(move || seen.set(seen.get() + 1))
        .build()
        .unwrap();

    cs.packet3(IT_NOP, &[1, 2, 3, 4]).unwrap();
    assert_eq!(cs.dwords().len(), 5);

    // 4 payload + header > 3 remaining
    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 4).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(cs.flush_count(), 1);
    assert_eq!(cs.dwords().len(), 1);
    assert_eq!(cs.dwords()[0], 0xC003_1000);

    cs.write_dwords(&[5, 6, 7, 8]).unwrap();
    cs.end_packet().unwrap();

    let flushes = recorder.flushes.borrow();
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0].dwords, vec![0xC003_1000, 1, 2, 3, 4]);
}

#[test]
fn test_exact_fit_does_not_flush() {
    let (mut cs, recorder) = stream(8);
    cs.packet3(IT_NOP, &[0; 3]).unwrap();
    cs.packet3(IT_NOP, &[0; 3]).unwrap();
    assert_eq!(cs.dwords().len(), 8);
    assert!(recorder.flushes.borrow().is_empty());
}

#[test]
fn test_relocation_patched_with_address_at_flush() {
    let (mut cs, recorder) = stream(32);
    let (concrete, bo) = mock(3, 4096, 0x0010_0000);

    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 2).unwrap();
    cs.write_dword(0xDEAD).unwrap();
    cs.add_relocation(&bo, Domains::VRAM, Domains::empty()).unwrap();
    cs.end_packet().unwrap();

    assert_eq!(cs.relocations().len(), 1);
    assert_eq!(cs.relocations()[0].offset, 8);
    assert_eq!(cs.dwords()[2], 0);

    // Buffer migrates before submission
    concrete.address.set(0x0080_0000);
    cs.flush().unwrap();

    let flushes = recorder.flushes.borrow();
    assert_eq!(flushes[0].dwords, vec![0xC001_1000, 0xDEAD, 0x0080_0000]);
    assert_eq!(flushes[0].handles, vec![3]);
    assert!(cs.relocations().is_empty());
}

#[test]
fn test_wide_relocation_writes_low_then_high() {
    let (mut cs, recorder) = stream(32);
    let (_, bo) = mock(4, 4096, 0x0000_0001_2345_6000);

    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 2).unwrap();
    cs.add_relocation_wide(&bo, Domains::GTT, Domains::empty()).unwrap();
    cs.end_packet().unwrap();
    cs.flush().unwrap();

    assert_eq!(
        recorder.flushes.borrow()[0].dwords,
        vec![0xC001_1000, 0x2345_6000, 0x0000_0001]
    );
}

#[test]
fn test_relocation_needs_room_in_packet() {
    let (mut cs, _) = stream(32);
    let (_, bo) = mock(5, 4096, 0);

    assert!(matches!(
        cs.add_relocation(&bo, Domains::VRAM, Domains::empty()),
        Err(CsError::InvalidState(_))
    ));

    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 1).unwrap();
    assert!(matches!(
        cs.add_relocation_wide(&bo, Domains::VRAM, Domains::empty()),
        Err(CsError::TransactionMismatch { .. })
    ));
    assert!(cs.relocations().is_empty());
}

#[test]
fn test_rolled_back_packet_drops_its_relocations() {
    let (mut cs, _) = stream(32);
    let (_, kept) = mock(1, 4096, 0);
    let (_, dropped) = mock(2, 8192, 0);

    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 1).unwrap();
    cs.add_relocation(&kept, Domains::VRAM, Domains::empty()).unwrap();
    cs.end_packet().unwrap();

    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 3).unwrap();
    cs.add_relocation(&dropped, Domains::VRAM, Domains::empty()).unwrap();
    assert!(cs.end_packet().is_err());

    assert_eq!(cs.dwords().len(), 2);
    assert_eq!(cs.relocations().len(), 1);
    assert_eq!(cs.referenced_buffers().len(), 1);
    assert_eq!(cs.space().demand(Domain::Vram), 4096);
}

#[test]
fn test_over_budget_and_inclusive_ceiling() {
    let recorder = Recorder::default();
    let mut cs = CommandStream::builder(recorder)
        .limit(Domain::Vram, 8192)
        .build()
        .unwrap();

    let (_, a) = mock(1, 4096, 0);
    let (_, b) = mock(2, 4096, 0);
    let (_, c) = mock(3, 1, 0);

    cs.add_persistent(&a, Domain::Vram);
    assert!(cs.check_space().is_ok());
    cs.add_persistent(&b, Domain::Vram);
    assert!(cs.check_space().is_ok());

    cs.add_persistent(&c, Domain::Vram);
    assert!(matches!(
        cs.check_space(),
        Err(CsError::Space(SpaceError::OverBudget(Domain::Vram)))
    ));

    assert!(cs.remove_persistent(&c));
    assert!(cs.check_space().is_ok());
}

#[test]
fn test_persistent_survives_flush() {
    let (mut cs, _) = stream(32);
    let (_, target) = mock(1, 4096, 0);
    let (_, vertices) = mock(2, 1024, 0);

    cs.add_persistent(&target, Domain::Vram);
    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 1).unwrap();
    cs.add_relocation(&vertices, Domains::VRAM, Domains::empty()).unwrap();
    cs.end_packet().unwrap();
    assert_eq!(cs.space().demand(Domain::Vram), 5120);

    cs.flush().unwrap();
    assert_eq!(cs.space().demand(Domain::Vram), 4096);

    cs.reset();
    assert_eq!(cs.space().demand(Domain::Vram), 4096);
    cs.clear_persistent();
    assert_eq!(cs.space().demand(Domain::Vram), 0);
}

#[test]
fn test_set_registers_payload() {
    let (mut cs, _) = stream(32);
    let values = [10, 20, 30, 40, 50];
    cs.set_registers(SX_ALPHA_TEST_CONTROL, &values).unwrap();

    let packets = decode(cs.dwords()).unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(
        packets[0].kind,
        PacketKind::Type3 {
            opcode: IT_SET_CONTEXT_REG
        }
    );
    assert_eq!(packets[0].payload.len(), values.len() + 1);
    assert_eq!(
        packets[0].payload[0],
        cs.translator().translate(SX_ALPHA_TEST_CONTROL)
    );
    assert_eq!(&packets[0].payload[1..], &values);
}

#[test]
fn test_register_round_trip() {
    let (mut cs, _) = stream(64);
    let writes = [
        (SX_MISC, 0x11),
        (SX_MEMORY_EXPORT_SIZE, 0x22),
        (DB_DEPTH_CONTROL, 0x33),
        (0x0003_8010, 0x44),
        (0x0003_e384, 0x55),
    ];
    for (addr, value) in writes {
        cs.set_register(addr, value).unwrap();
    }

    let decoded: Vec<(u32, u32)> = decode(cs.dwords())
        .unwrap()
        .into_iter()
        .map(|p| {
            let PacketKind::Type3 { opcode } = p.kind else {
                panic!("unexpected type-0 packet");
            };
            let category = RegisterCategory::from_set_opcode(opcode).unwrap();
            let addr = cs.translator().address_of(category, p.payload[0]).unwrap();
            (addr, p.payload[1])
        })
        .collect();

    assert_eq!(decoded, writes);
}

#[test]
fn test_explicit_opcode_write() {
    let (mut cs, _) = stream(16);
    cs.set_register_with(IT_SET_CONFIG_REG, SX_MEMORY_EXPORT_SIZE, 0)
        .unwrap();
    assert_eq!(cs.dwords(), &[0xC001_6800, 0x405, 0]);
}

#[test]
fn test_failed_submission_keeps_contents() {
    let (mut cs, recorder) = stream(16);
    cs.set_register(SX_MISC, 1).unwrap();

    recorder.fail.set(true);
    assert!(matches!(cs.flush(), Err(CsError::SubmissionFailed(_))));
    assert_eq!(cs.dwords().len(), 3);
    assert_eq!(cs.flush_count(), 0);

    recorder.fail.set(false);
    cs.flush().unwrap();
    assert_eq!(cs.flush_count(), 1);
    assert!(cs.dwords().is_empty());
}

#[test]
fn test_budget_limits_reach_target() {
    let recorder = Recorder::default();
    let mut cs = CommandStream::builder(recorder.clone())
        .limit(Domain::Vram, 256 << 20)
        .build()
        .unwrap();
    cs.context_control().unwrap();
    cs.flush().unwrap();
    assert_eq!(recorder.flushes.borrow()[0].vram_limit, Some(256 << 20));
}

#[test]
fn test_drop_with_open_packet_does_not_submit() {
    let recorder = Recorder::default();
    {
        let mut cs = CommandStream::builder(recorder.clone()).build().unwrap();
        cs.set_register(SX_MISC, 0).unwrap();
        cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 2).unwrap();
    }
    assert!(recorder.flushes.borrow().is_empty());
}

fn kernel_stream(capacity: usize) -> (CommandStream, Recorder) {
    let target = KernelLike::default();
    let recorder = target.inner.clone();
    let cs = CommandStream::builder(target)
        .capacity_dwords(capacity)
        .build()
        .unwrap();
    (cs, recorder)
}

#[test]
fn test_reloc_packets_follow_each_packet() {
    let (mut cs, recorder) = kernel_stream(64);
    let (_, a) = mock(10, 4096, 0x1000);
    let (_, b) = mock(11, 4096, 0x2000);

    let resource = PacketKind::Type3 {
        opcode: IT_SET_RESOURCE,
    };
    cs.begin_packet_with_relocs(resource, 2, 1).unwrap();
    cs.write_dword(0).unwrap();
    cs.add_relocation(&a, Domains::VRAM, Domains::empty()).unwrap();
    cs.end_packet().unwrap();

    cs.begin_packet_with_relocs(resource, 2, 2).unwrap();
    cs.add_relocation(&b, Domains::GTT, Domains::empty()).unwrap();
    cs.add_relocation(&a, Domains::VRAM, Domains::empty()).unwrap();
    cs.end_packet().unwrap();
    cs.flush().unwrap();

    let flushes = recorder.flushes.borrow();
    assert_eq!(flushes[0].handles, vec![10, 11]);

    let packets = decode(&flushes[0].dwords).unwrap();
    let nop = PacketKind::Type3 { opcode: IT_NOP };
    let shape: Vec<(PacketKind, Vec<u32>)> =
        packets.into_iter().map(|p| (p.kind, p.payload)).collect();
    assert_eq!(
        shape,
        vec![
            (resource, vec![0, 0x1000]),
            (nop, vec![0]),
            (resource, vec![0x2000, 0x1000]),
            (nop, vec![4]),
            (nop, vec![0]),
        ]
    );
}

#[test]
fn test_reloc_packet_room_reserved_before_flush() {
    let (mut cs, recorder) = kernel_stream(8);
    let (_, bo) = mock(1, 4096, 0);

    cs.packet3(IT_NOP, &[0; 4]).unwrap();
    // header + 1 payload + 2 relocation dwords > 3 left
    cs.begin_packet_with_relocs(PacketKind::Type3 { opcode: IT_NOP }, 1, 1)
        .unwrap();
    assert_eq!(recorder.flushes.borrow().len(), 1);

    cs.add_relocation(&bo, Domains::VRAM, Domains::empty()).unwrap();
    cs.end_packet().unwrap();
    assert_eq!(cs.dwords(), &[0xC000_1000, 0, 0xC000_1000, 0]);
}

#[test]
fn test_unreserved_reloc_packet_without_room() {
    let (mut cs, recorder) = kernel_stream(8);
    let (_, bo) = mock(1, 4096, 0);

    cs.packet3(IT_NOP, &[0; 4]).unwrap();
    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 1).unwrap();
    assert!(recorder.flushes.borrow().is_empty());

    assert!(matches!(
        cs.add_relocation(&bo, Domains::VRAM, Domains::empty()),
        Err(CsError::CapacityExceeded { .. })
    ));
    assert!(cs.relocations().is_empty());
    assert_eq!(cs.space().demand(Domain::Vram), 0);
}

#[test]
fn test_rolled_back_packet_emits_no_reloc_packet() {
    let (mut cs, _) = kernel_stream(32);
    let (_, bo) = mock(1, 4096, 0);

    cs.begin_packet_with_relocs(PacketKind::Type3 { opcode: IT_NOP }, 2, 1)
        .unwrap();
    cs.add_relocation(&bo, Domains::VRAM, Domains::empty()).unwrap();
    assert!(cs.end_packet().is_err());
    assert!(cs.dwords().is_empty());
}

#[test]
fn test_raised_ceiling_passes_space_check() {
    let (mut cs, _) = stream(16);
    let (_, bo) = mock(1, 4096, 0);
    cs.set_limit(Domain::Vram, 1024);
    cs.add_persistent(&bo, Domain::Vram);
    assert!(matches!(
        cs.check_space(),
        Err(CsError::Space(SpaceError::OverBudget(Domain::Vram)))
    ));

    cs.set_limit(Domain::Vram, 4096);
    assert!(cs.check_space().is_ok());

    let mut tight = SpaceBudget::new();
    tight.set_limit(Domain::Vram, 1);
    cs.set_budget(tight);
    assert!(cs.check_space().is_err());
    cs.set_budget(SpaceBudget::new());
    assert!(cs.check_space().is_ok());
}

#[test]
fn test_unbacked_buffer_rejected_by_stream() {
    let (mut cs, _) = stream(16);
    let bo: SharedBuffer = Arc::new(Unbacked);

    cs.begin_packet(PacketKind::Type3 { opcode: IT_NOP }, 1).unwrap();
    assert!(matches!(
        cs.add_relocation(&bo, Domains::VRAM, Domains::empty()),
        Err(CsError::Relocation(RelocationError::Unsupported))
    ));
    assert_eq!(cs.dwords().len(), 1);
    assert!(cs.relocations().is_empty());
    assert_eq!(cs.space().demand(Domain::Vram), 0);
    assert!(cs.is_building());
}
