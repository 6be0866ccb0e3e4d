use rand::Rng;

const MIN_CENTS: u32 = 10_000;
const MAX_CENTS: u32 = 100_000;

/// Draws an order amount uniformly from [100.00, 1000.00], rounded to cent
/// precision. Mirrors the original service's crypto-seeded generator;
/// `rand`'s thread-local RNG is reseeded from the OS CSPRNG per draw, which
/// is enough entropy for an amount that is never security-sensitive.
pub fn generate_amount() -> f64 {
    let cents = rand::thread_rng().gen_range(MIN_CENTS..=MAX_CENTS);
    cents as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_stays_within_bounds() {
        for _ in 0..1000 {
            let amount = generate_amount();
            assert!(amount >= 100.0, "amount {amount} below floor");
            assert!(amount <= 1000.0, "amount {amount} above ceiling");
        }
    }

    #[test]
    fn amount_has_cent_precision() {
        let amount = generate_amount();
        let cents = (amount * 100.0).round();
        assert!((amount * 100.0 - cents).abs() < 1e-9);
    }
}
