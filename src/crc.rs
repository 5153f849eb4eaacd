/// CRC32C (Castagnoli), the same idiom the teacher's ext4 reader uses for
/// superblock and bitmap checksums (`filesys/e2fs/mod.rs`), lifted here as a
/// shared helper since HN4 needs it in several unrelated modules (armored
/// bitmap ECC, epoch headers, nano-lattice payloads, superblock replicas).
pub fn crc32c(seed: u32, buf: &[u8]) -> u32
{
    crc::crc32::update(seed ^ (!0), &crc::crc32::CASTAGNOLI_TABLE, buf) ^ (!0u32)
}
