use radeon_cs::cs::memory::manager::CreateFlags;
use radeon_cs::cs::memory::{BufferManager, BufferObject, Domains, GemBuffer};
use radeon_cs::drm::device::RadeonDevice;
use radeon_cs::utils::pattern_bytes;
use radeon_cs::CsResult;
use std::env;

const BUF_SIZE: usize = 256;

fn print_bo_info(bo: &GemBuffer) {
    println!(
        "    handle: {:#x}  size: {:#x}  domains: {:?}",
        bo.handle().unwrap_or_default(),
        bo.size(),
        bo.domains()
    );
}

fn print_buffers(orig: &[u8], buf: &[u8]) {
    println!("        original        |          buffer");
    for (a, b) in orig.chunks(8).zip(buf.chunks(8)) {
        let left: Vec<String> = a.iter().map(|x| format!("{x:02x}")).collect();
        let right: Vec<String> = b.iter().map(|x| format!("{x:02x}")).collect();
        println!("{}   {}", left.join(" "), right.join(" "));
    }
}

fn main() -> CsResult<()> {
    env_logger::init();

    let path = env::args().nth(1).unwrap_or_else(|| "/dev/dri/card0".to_string());

    // 1. Open the Driver
    println!("[+] Opening {path}...");
    let device = match RadeonDevice::open(&path) {
        Ok(dev) => dev,
        Err(e) => {
            eprintln!("[-] Failed to open {path}: {e}");
            eprintln!("    (Ensure the 'radeon' kernel module is loaded and you have permissions)");
            return Err(e.into());
        }
    };

    // 2. Interface version, as radeondemo requests it
    let version = device.set_interface_version(1, 1)?;
    println!(
        "[+] DRM Interface Version: {}.{}",
        version.drm_di_major, version.drm_di_minor
    );

    // 3. Memory sizes
    match device.gem_info() {
        Ok(info) => {
            println!("    GART size: {:#10x}", info.gart_size);
            println!("    VRAM size: {:#10x}", info.vram_size);
            println!("    VRAM vis:  {:#10x}", info.vram_visible);
        }
        Err(e) => eprintln!("[-] DRM_RADEON_GEM_INFO failed: {e}"),
    }

    // 4. Write a pattern through one mapping, read it back through another
    let manager = BufferManager::new(&device);
    let bo = manager.allocate(BUF_SIZE as u64, 4096, Domains::VRAM, CreateFlags::empty())?;
    println!("\n[+] Buffer object created");
    print_bo_info(&bo);

    let pattern = pattern_bytes(BUF_SIZE, 50, 253);
    {
        let mut mapping = bo.map(true)?;
        println!("    mapped at {:p}", mapping.as_ptr());
        if let Some(dst) = mapping.as_mut_slice() {
            dst[..BUF_SIZE].copy_from_slice(&pattern);
        }
    }
    println!("    unmapped");

    {
        let mapping = bo.map(false)?;
        println!("    mapped again (read-only) at {:p}", mapping.as_ptr());
        println!("\n---------------- BUFFER 1 ----------------");
        print_buffers(&pattern, &mapping.as_slice()[..BUF_SIZE]);
    }

    // 5. A fresh buffer shows whatever the kernel handed out
    let bo2 = manager.allocate(BUF_SIZE as u64, 4096, Domains::VRAM, CreateFlags::empty())?;
    print_bo_info(&bo2);
    let mapping = bo2.map(false)?;
    println!("\n---------------- BUFFER 2 ----------------");
    print_buffers(&pattern, &mapping.as_slice()[..BUF_SIZE]);

    Ok(())
}
