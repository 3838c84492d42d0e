use crate::config::Result;

/// A single place a configuration value may come from.
///
/// `None` means the source has nothing to say, so the next source in an [`Or`] chain is asked.
pub trait ConfigSource: Sized {
    type Value;

    fn source_value(self) -> Option<Result<Self::Value>>;

    fn or<T: ConfigSource<Value = Self::Value>>(self, fallback: T) -> Or<Self, T> {
        Or::new(self, fallback)
    }
}

#[derive(Clone)]
pub struct Or<A, B>(A, B);

impl<A, B> Or<A, B>
where
    A: ConfigSource,
    B: ConfigSource<Value = A::Value>,
{
    fn new(first: A, fallback: B) -> Self {
        Or(first, fallback)
    }
}

impl<A, B> ConfigSource for Or<A, B>
where
    A: ConfigSource,
    B: ConfigSource<Value = A::Value>,
{
    type Value = A::Value;

    fn source_value(self) -> Option<Result<Self::Value>> {
        self.0.source_value().or_else(|| self.1.source_value())
    }
}

impl<V> ConfigSource for Option<V> {
    type Value = V;

    fn source_value(self) -> Option<Result<Self::Value>> {
        self.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::config::{ConfigError, from_env::FromEnv};
    use crate::util::testing::with_env_vars;

    #[rstest]
    #[case(None, None, None)]
    #[case(Some(1), None, Some(1))]
    #[case(None, Some(2), Some(2))]
    #[case(Some(1), Some(2), Some(1))]
    fn or_prefers_first(
        #[case] first: Option<u32>,
        #[case] second: Option<u32>,
        #[case] expected: Option<u32>,
    ) {
        let value = ConfigSource::or(first, second)
            .source_value()
            .transpose()
            .unwrap();

        assert_eq!(value, expected);
    }

    #[rstest]
    fn env_wins_over_file_value() {
        with_env_vars(vec![("PROXIFY_TEST_SOURCE", Some("7"))], || {
            let value = FromEnv::<u32>::new("PROXIFY_TEST_SOURCE")
                .or(Some(3))
                .source_value()
                .unwrap()
                .unwrap();

            assert_eq!(value, 7);
        });
    }

    #[rstest]
    fn invalid_env_does_not_fall_through() {
        with_env_vars(vec![("PROXIFY_TEST_SOURCE", Some("seven"))], || {
            let value = FromEnv::<u32>::new("PROXIFY_TEST_SOURCE")
                .or(Some(3))
                .source_value()
                .unwrap();

            assert!(matches!(
                value,
                Err(ConfigError::InvalidValue(raw, "PROXIFY_TEST_SOURCE")) if raw == "seven"
            ));
        });
    }
}
