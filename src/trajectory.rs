use crate::util::gcd;

const DAMPENER_MAX_TRIES: u32 = 32;
const GRAVITY_CONSTANT: u64 = 0xA5A5_A5A5_A5A5_A5A5;
const GRAVITY_ASSIST_THRESHOLD: u8 = 4;

/// Applies the resonance dampener (spec.md §4.2): forces `v` odd, then walks
/// `v += 2` (wrapping to 3 on overflow) until `gcd(v mod phi, phi) == 1` or
/// 32 tries are exhausted, at which point it falls back to `v = 1`.
///
/// `phi <= 1` is trivially coprime with everything; returned unchanged
/// (forced odd).
pub fn dampen(v: u64, phi: u64) -> u64
{
    dampen_reporting(v, phi).0
}

/// Same as `dampen`, but also reports whether the 32-try search gave up
/// and fell back to `V' = 1`. Callers with a logger (`genesis::alloc_genesis`)
/// surface this as a one-time warning per anchor, not an error — the
/// allocation still proceeds, just with a degraded, always-colliding
/// stride (spec.md §4.2 Open Question).
pub fn dampen_reporting(v: u64, phi: u64) -> (u64, bool)
{
    let mut v = v | 1;

    if phi <= 1 {
        return (v, false);
    }

    let mut tries = 0;
    while gcd(v % phi, phi) != 1 && tries < DAMPENER_MAX_TRIES {
        v = v.checked_add(2).unwrap_or(3) | 1;
        tries += 1;
    }

    if gcd(v % phi, phi) != 1 {
        return (1, true);
    }

    (v, false)
}

/// The gravity-assist remapping applied at orbit shell `K >= 4`: a
/// teleportation out of a collision cluster (spec.md §4.2).
fn gravity_assist(v: u64) -> u64
{
    (v.rotate_left(17) ^ GRAVITY_CONSTANT) | 1
}

/// Pure trajectory function `T(G, V, N, M, K) -> block`.
///
/// `flux_aligned` and `phi` are precomputed from the volume's `Geometry`
/// (see `Geometry::flux_aligned_at` / `Geometry::flux_period_at`) so this
/// function stays a pure mapping with no knowledge of region layout beyond
/// what its caller hands it — this is what lets spec.md §8's literal
/// scenarios exercise it directly.
///
/// Returns `None` only when `phi == 0` (a degenerate, zero-slot Flux region;
/// callers must reject that geometry before allocating).
pub fn trajectory(
    g: u64,
    v: u64,
    n: u64,
    k: u8,
    flux_aligned: u64,
    s: u64,
    phi: u64,
    is_zns: bool,
) -> Option<u64>
{
    if phi == 0 {
        return None;
    }

    let (v_prime, theta): (u64, u64) = if is_zns {
        // ZNS: theta disabled, V forced to 1 — every probe collapses to the
        // linear append head.
        (1, 0)
    } else {
        let dampened = dampen(v, phi);

        if k >= GRAVITY_ASSIST_THRESHOLD {
            (gravity_assist(dampened), 0)
        } else {
            (dampened, k as u64)
        }
    };

    let idx = g.wrapping_add(n.wrapping_mul(v_prime)).wrapping_add(theta) % phi;

    Some(flux_aligned + idx * s)
}
