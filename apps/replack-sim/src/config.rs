use config::{Config, ConfigError, Environment, File};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct SimConfig {
    #[serde(deserialize_with = "deserialize_list")]
    pub replicas: Vec<String>,
    pub queue_capacity: usize,
    pub dispatch_buffer: usize,
    #[serde(with = "humantime_serde")]
    pub timeout_delta: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
    pub writes: u64,
    pub batch_size: u64,
    pub pcode: i32,
    #[serde(with = "humantime_serde")]
    pub max_reply_delay: Duration,
    pub drop_probability: f64,
    pub error_probability: f64,
    pub seed: u64,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(split_list(value))
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element()? {
                vec.push(element);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl SimConfig {
    /// Layers defaults, an optional TOML file, then `REPLACK_SIM_*` variables.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("replicas", "127.0.0.1:7001,127.0.0.1:7002,127.0.0.1:7003")?
            .set_default("queue_capacity", 1024)?
            .set_default("dispatch_buffer", 8192)?
            .set_default("timeout_delta", "10ms")?
            .set_default("write_timeout", "200ms")?
            .set_default("write_interval", "0s")?
            .set_default("reap_interval", "20ms")?
            .set_default("writes", 1000)?
            .set_default("batch_size", 4)?
            .set_default("pcode", 1001)?
            .set_default("max_reply_delay", "20ms")?
            .set_default("drop_probability", 0.01)?
            .set_default("error_probability", 0.0)?
            .set_default("seed", 42)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("REPLACK_SIM").try_parsing(true));

        let cfg: SimConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, p) in [
            ("drop_probability", self.drop_probability),
            ("error_probability", self.error_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Message(format!(
                    "{name} must be within [0, 1], got {p}"
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Message("batch_size must be > 0".into()));
        }
        if self.write_timeout <= self.timeout_delta {
            return Err(ConfigError::Message(
                "write_timeout must exceed timeout_delta".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    // process environment is shared by every test thread
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<F>(vars: &[(&str, &str)], test: F)
    where
        F: FnOnce(),
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut old = Vec::new();
        for (k, v) in vars {
            old.push((k.to_string(), env::var(k).ok()));
            env::set_var(k, v);
        }

        test();

        for (k, maybe_old) in old {
            match maybe_old {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
    }

    #[test]
    fn defaults_are_applied() {
        with_env(&[], || {
            let cfg = SimConfig::new(None).expect("failed to build config");

            assert_eq!(
                cfg.replicas,
                vec!["127.0.0.1:7001", "127.0.0.1:7002", "127.0.0.1:7003"]
            );
            assert_eq!(cfg.queue_capacity, 1024);
            assert_eq!(cfg.dispatch_buffer, 8192);
            assert_eq!(cfg.timeout_delta, Duration::from_millis(10));
            assert_eq!(cfg.write_timeout, Duration::from_millis(200));
            assert_eq!(cfg.write_interval, Duration::ZERO);
            assert_eq!(cfg.reap_interval, Duration::from_millis(20));
            assert_eq!(cfg.writes, 1000);
            assert_eq!(cfg.batch_size, 4);
            assert_eq!(cfg.pcode, 1001);
            assert_eq!(cfg.max_reply_delay, Duration::from_millis(20));
            assert_eq!(cfg.drop_probability, 0.01);
            assert_eq!(cfg.error_probability, 0.0);
            assert_eq!(cfg.seed, 42);
        });
    }

    #[test]
    fn env_vars_override_defaults() {
        with_env(
            &[
                ("REPLACK_SIM_QUEUE_CAPACITY", "64"),
                ("REPLACK_SIM_WRITE_TIMEOUT", "1s 500ms"),
                ("REPLACK_SIM_DROP_PROBABILITY", "0.25"),
                ("REPLACK_SIM_REPLICAS", "10.0.0.1:9000; 10.0.0.2:9000"),
            ],
            || {
                let cfg = SimConfig::new(None).expect("failed to build config");
                assert_eq!(cfg.queue_capacity, 64);
                assert_eq!(cfg.write_timeout, Duration::from_millis(1_500));
                assert!((cfg.drop_probability - 0.25).abs() < f64::EPSILON);
                assert_eq!(cfg.replicas, vec!["10.0.0.1:9000", "10.0.0.2:9000"]);
            },
        );
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        with_env(&[("REPLACK_SIM_ERROR_PROBABILITY", "1.5")], || {
            let err = SimConfig::new(None).expect_err("probability > 1");
            assert!(err.to_string().contains("error_probability"));
        });
    }

    #[test]
    fn file_overrides_take_precedence_over_defaults_but_not_env() {
        use std::io::Write;

        let mut tmp = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            tmp,
            r#"
writes = 12
reap_interval = "5ms"
replicas = ["10.1.0.1:7001", "10.1.0.2:7001"]
"#
        )
        .expect("write to temp file");

        with_env(&[("REPLACK_SIM_WRITES", "99")], || {
            let cfg = SimConfig::new(Some(PathBuf::from(tmp.path()))).expect("load config");
            assert_eq!(cfg.writes, 99);
            assert_eq!(cfg.reap_interval, Duration::from_millis(5));
            assert_eq!(cfg.replicas, vec!["10.1.0.1:7001", "10.1.0.2:7001"]);
        });
    }

    #[test]
    fn split_list_tolerates_separators_and_blanks() {
        let cases = vec![
            ("a,b,c", vec!["a", "b", "c"]),
            ("a;b;c", vec!["a", "b", "c"]),
            ("a, b ; c ", vec!["a", "b", "c"]),
            (",a,,b;", vec!["a", "b"]),
            ("  ", Vec::<&str>::new()),
        ];
        for (input, expected) in cases {
            assert_eq!(split_list(input), expected, "failed on input: {input}");
        }
    }
}
