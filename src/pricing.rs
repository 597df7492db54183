// Cost estimation: a flat per-token rate sourced from the matched
// provider's `metadata.cost_per_input_token`/`cost_per_output_token`, rather
// than a hardcoded per-model-version table. The catalog carries pricing data
// so new models and providers never require a code change here.

pub fn estimate_cost(
    cost_per_input_token: f64,
    cost_per_output_token: f64,
    input_tokens: u64,
    output_tokens: u64,
) -> f64 {
    (input_tokens as f64 * cost_per_input_token) + (output_tokens as f64 * cost_per_output_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_rate_cost() {
        let cost = estimate_cost(0.000003, 0.000015, 1000, 500);
        assert!((cost - 0.0105).abs() < 0.0001);
    }

    #[test]
    fn zero_rate_is_free() {
        assert_eq!(estimate_cost(0.0, 0.0, 1000, 1000), 0.0);
    }
}
