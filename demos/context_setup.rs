use radeon_cs::cs::memory::manager::CreateFlags;
use radeon_cs::cs::memory::{BufferManager, Domain, Domains, SharedBuffer};
use radeon_cs::cs::packet::{PacketKind, decode};
use radeon_cs::cs::registers::{
    DB_DEPTH_CONTROL, RegisterCategory, SX_ALPHA_TEST_CONTROL, SX_MEMORY_EXPORT_SIZE,
    SX_MISC,
};
use radeon_cs::cs::space::SpaceBudget;
use radeon_cs::cs::submit::DrmSubmitter;
use radeon_cs::drm::device::RadeonDevice;
use radeon_cs::drm::ioctl::GemInfoArgs;
use radeon_cs::{CommandStream, CsResult};
use std::env;

fn main() -> CsResult<()> {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| "/dev/dri/card0".to_string());
    println!("[+] Opening {path}...");
    let device = RadeonDevice::open(&path)?;
    device.set_interface_version(1, 1)?;

    // Without GEM_INFO the stream runs with zero ceilings.
    let info = device.gem_info().unwrap_or_else(|e| {
        eprintln!("[-] DRM_RADEON_GEM_INFO failed: {e}");
        GemInfoArgs::default()
    });

    // Shader buffer: one zero dword
    let manager = BufferManager::new(&device);
    let shader = manager.allocate(4096, 4096, Domains::VRAM, CreateFlags::empty())?;
    {
        let mut mapping = shader.map(true)?;
        if let Some(bytes) = mapping.as_mut_slice() {
            bytes[..4].copy_from_slice(&0u32.to_le_bytes());
        }
    }
    let shader: SharedBuffer = shader;

    let mut cs = CommandStream::builder(DrmSubmitter::new(&device))
        .capacity_dwords(16384)
        .budget(SpaceBudget::from_gem_info(&info))
        .on_flush(|| log::info!("command buffer submitted"))
        .build()?;
    cs.add_persistent(&shader, Domain::Vram);

    // Start 3D engine
    cs.context_control()?;

    cs.set_register(SX_MISC, 0)?;
    // SX_ALPHA_TEST_CONTROL and CB_BLEND_{RED,GREEN,BLUE,ALPHA}
    cs.set_registers(SX_ALPHA_TEST_CONTROL, &[0, 0, 0, 0, 0])?;
    cs.set_register(SX_MEMORY_EXPORT_SIZE, 0)?;
    cs.set_register(DB_DEPTH_CONTROL, 0)?;

    println!("\n[+] Command stream ({} dwords):", cs.dwords().len());
    for packet in decode(cs.dwords())? {
        println!("    @{:3} {:?} {:08x?}", packet.offset, packet.kind, packet.payload);
        if let Some(&index) = packet.payload.first() {
            let category = match packet.kind {
                PacketKind::Type3 { opcode } => {
                    RegisterCategory::from_set_opcode(opcode)
                }
                PacketKind::Type0 { .. } => None,
            };
            if let Some(addr) = category.and_then(|c| cs.translator().address_of(c, index)) {
                println!("          -> register {addr:#07x}");
            }
        }
    }

    cs.check_space()?;
    cs.flush()?;
    println!("[+] Submitted {} command buffer(s)", cs.flush_count());

    Ok(())
}
