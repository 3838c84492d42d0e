use std::{marker::PhantomData, str::FromStr};

use crate::config::{ConfigError, Result, source::ConfigSource};

#[derive(Clone)]
pub struct FromEnv<T>(&'static str, PhantomData<T>);

impl<T> FromEnv<T> {
    pub fn new(env: &'static str) -> Self {
        FromEnv(env, PhantomData::<T>)
    }
}

impl<T> ConfigSource for FromEnv<T>
where
    T: FromStr,
{
    type Value = T;

    fn source_value(self) -> Option<Result<Self::Value>> {
        std::env::var(self.0).ok().map(|var| {
            var.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(var.to_string(), self.0))
        })
    }
}

/// Comma separated list of values, e.g. `53,443` or `2001:4860:4860::/48, 2606:4700::/32`.
///
/// Empty items are skipped, so a trailing comma is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommaSeparated<T>(pub Vec<T>);

impl<T> FromStr for CommaSeparated<T>
where
    T: FromStr,
{
    type Err = T::Err;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::parse)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(CommaSeparated)
    }
}

#[cfg(test)]
mod tests {
    use ipnet::Ipv6Net;
    use rstest::rstest;

    use super::*;
    use crate::util::testing::with_env_vars;

    #[rstest]
    fn basic() {
        with_env_vars(vec![("TEST_VALUE", Some("13"))], || {
            let value = FromEnv::<i32>::new("TEST_VALUE");

            assert_eq!(value.source_value().unwrap().unwrap(), 13);
        });
        let value = FromEnv::<i32>::new("TEST_VALUE");
        assert!(value.source_value().is_none());
    }

    #[rstest]
    #[case("53,443", vec![53, 443])]
    #[case(" 53 , 443 ,", vec![53, 443])]
    #[case("", vec![])]
    fn comma_separated_ports(#[case] raw: &str, #[case] expected: Vec<u16>) {
        let CommaSeparated(ports) = raw.parse::<CommaSeparated<u16>>().unwrap();

        assert_eq!(ports, expected);
    }

    #[rstest]
    fn comma_separated_prefixes() {
        with_env_vars(
            vec![("TEST_PREFIXES", Some("2001:4860:4860::/48,2606:4700::/32"))],
            || {
                let CommaSeparated(prefixes) = FromEnv::<CommaSeparated<Ipv6Net>>::new("TEST_PREFIXES")
                    .source_value()
                    .unwrap()
                    .unwrap();

                assert_eq!(prefixes.len(), 2);
                assert_eq!(prefixes[1].prefix_len(), 32);
            },
        );
    }

    #[rstest]
    fn comma_separated_rejects_garbage() {
        assert!("53,https".parse::<CommaSeparated<u16>>().is_err());
    }
}
