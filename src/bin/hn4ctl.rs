use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use clap::Parser;

use hn4::error::{ErrorKind, Result};
use hn4::geometry::{DeviceCaps, Geometry, HwFlags, Profile};
use hn4::hal::{Hal, TopologyNode};
use hn4::volume::Volume;

/// Thin format/mount demo over a regular file — not a specified product
/// surface, just enough to exercise the engine end to end the way the
/// teacher's own CLI exercised its filesystem readers.
#[derive(Parser, Debug)]
#[clap(name = "hn4ctl")]
struct Cli {
    /// Path to the backing file.
    path: String,

    /// Total capacity in blocks.
    #[clap(long, default_value_t = 25_600)]
    total_blocks: u64,

    /// Block size in bytes.
    #[clap(long, default_value_t = 4096)]
    block_size: u64,

    /// Mount an existing volume instead of formatting a new one.
    #[clap(long)]
    mount_only: bool,
}

struct FileHal {
    file: Mutex<File>,
    caps: DeviceCaps,
}

impl FileHal {
    fn open(path: &str, total_blocks: u64, block_size: u64) -> Result<Self>
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|_| ErrorKind::HwIo)?;

        file.set_len(total_blocks * block_size)
            .map_err(|_| ErrorKind::HwIo)?;

        Ok(Self {
            file: Mutex::new(file),
            caps: DeviceCaps {
                capacity_blocks: total_blocks,
                logical_block_size: block_size,
                sector_size: 512,
                zone_size: 0,
                flags: HwFlags::default(),
                queue_count: 1,
            },
        })
    }
}

impl Hal for FileHal {
    fn get_caps(&self) -> DeviceCaps
    {
        self.caps
    }

    fn persist(&self, lba: u64, buf: &[u8]) -> Result<()>
    {
        let mut file = self.file.lock().unwrap();
        let offset = lba * self.caps.logical_block_size;
        file.seek(SeekFrom::Start(offset)).map_err(|_| ErrorKind::HwIo)?;
        file.write_all(buf).map_err(|_| ErrorKind::HwIo)?;
        Ok(())
    }

    fn submit_io(&self, lba: u64, buf: &mut [u8]) -> Result<()>
    {
        let mut file = self.file.lock().unwrap();
        let offset = lba * self.caps.logical_block_size;
        file.seek(SeekFrom::Start(offset)).map_err(|_| ErrorKind::HwIo)?;
        file.read_exact(buf).map_err(|_| ErrorKind::HwIo)?;
        Ok(())
    }

    fn sync_io(&self) -> Result<()>
    {
        self.file.lock().unwrap().sync_all().map_err(|_| ErrorKind::HwIo.into())
    }

    fn barrier(&self) -> Result<()>
    {
        self.sync_io()
    }

    fn mem_alloc(&self, len: usize) -> Result<Vec<u8>>
    {
        Ok(vec![0u8; len])
    }

    fn get_time_ns(&self) -> u64
    {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    fn get_random_u64(&self) -> u64
    {
        use rand::RngCore;
        rand::thread_rng().next_u64()
    }

    fn micro_sleep(&self, micros: u64)
    {
        std::thread::sleep(std::time::Duration::from_micros(micros));
    }

    fn get_temperature(&self) -> Option<i32>
    {
        None
    }

    fn topology_count(&self) -> u32
    {
        1
    }

    fn topology_node(&self, idx: u32) -> Option<TopologyNode>
    {
        if idx == 0 {
            Some(TopologyNode {
                queue_id: 0,
                numa_node: 0,
                cpu_affinity_mask: u64::MAX,
            })
        } else {
            None
        }
    }
}

fn build_geometry(total_blocks: u64, block_size: u64) -> Geometry
{
    let horizon_start = total_blocks - total_blocks / 20;
    let journal_start = horizon_start + total_blocks / 40;
    Geometry {
        block_size,
        sector_size: 512,
        total_blocks,
        profile: Profile::Standard,
        is_zns: false,
        flux_start: 64,
        horizon_start,
        journal_start,
        epoch_start: journal_start,
        cortex_start: 16,
        bitmap_start: 1,
        qmask_start: 8,
        fractal_max: 18,
    }
}

fn main() -> anyhow::Result<()>
{
    let cli = Cli::parse();
    let geometry = build_geometry(cli.total_blocks, cli.block_size);
    let hal = FileHal::open(&cli.path, cli.total_blocks, cli.block_size)?;

    let volume = if cli.mount_only {
        Volume::mount(&hal, geometry)?
    } else {
        Volume::format(&hal, geometry)?
    };

    println!("mounted {} ({} blocks, {} byte blocks)", cli.path, cli.total_blocks, cli.block_size);
    println!("state flags: {:#x}", volume.flags.bits());

    volume.unmount(false)?;
    Ok(())
}
