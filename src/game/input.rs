use std::f64::consts::TAU;

/// Validates a heading from the wire. Non-finite or wildly out-of-range
/// values are rejected so the last valid heading persists.
pub fn parse_heading(value: f64) -> Option<f64> {
  if !value.is_finite() || value.abs() > TAU {
    return None;
  }
  Some(value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_non_finite_and_out_of_range() {
    assert_eq!(parse_heading(f64::NAN), None);
    assert_eq!(parse_heading(f64::INFINITY), None);
    assert_eq!(parse_heading(100.0), None);
    assert_eq!(parse_heading(1.25), Some(1.25));
    assert_eq!(parse_heading(-TAU), Some(-TAU));
  }
}
