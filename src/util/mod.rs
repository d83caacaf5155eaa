pub mod env;
pub mod gateway;
pub mod telemetry;

/// Compares two strings in time proportional to their length only, so a mismatching signature
/// doesn't leak how many leading bytes were correct.
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let res = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (l, r)| {
            acc | (std::hint::black_box(*l) ^ std::hint::black_box(*r))
        });

    res == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_time_cmp() {
        let expects = "9f86d081884c7d65";
        let passing = "9f86d081884c7d65";

        let bad_start = "0086d081884c7d65";
        let bad_end = "9f86d081884c7d00";

        let short = "9f86d081884c7d6";
        let long = "9f86d081884c7d655";

        assert!(constant_time_cmp(expects, passing));
        assert!(!constant_time_cmp(expects, bad_start));
        assert!(!constant_time_cmp(expects, bad_end));
        assert!(!constant_time_cmp(expects, short));
        assert!(!constant_time_cmp(expects, long));
    }
}
