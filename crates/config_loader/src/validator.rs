//! 配置校验模块
//!
//! 校验规则：
//! - buffer_count > lead_window >= 1
//! - packets_per_transfer > 0
//! - poll_interval_us > 0, max_advance_steps > 0
//! - stall.check_interval_cycles > 0, stall.threshold > 0
//! - carrier_frequencies 非空且唯一

use std::collections::HashSet;

use contracts::{ContractError, StreamConfig};

/// 校验 StreamConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &StreamConfig) -> Result<(), ContractError> {
    validate_ring(config)?;
    validate_timing(config)?;
    validate_stall(config)?;
    validate_carriers(config)?;
    Ok(())
}

/// 校验环形缓冲与提前量
///
/// 与 `StreamDriver::open` 共用同一套规则。
fn validate_ring(config: &StreamConfig) -> Result<(), ContractError> {
    config.check()
}

/// 校验轮询参数
fn validate_timing(config: &StreamConfig) -> Result<(), ContractError> {
    if config.poll_interval_us == 0 {
        return Err(ContractError::config_validation(
            "poll_interval_us",
            "poll_interval_us must be > 0",
        ));
    }
    if config.max_advance_steps == 0 {
        return Err(ContractError::config_validation(
            "max_advance_steps",
            "max_advance_steps must be > 0",
        ));
    }
    Ok(())
}

/// 校验卡顿检测参数
fn validate_stall(config: &StreamConfig) -> Result<(), ContractError> {
    if config.stall.check_interval_cycles == 0 {
        return Err(ContractError::config_validation(
            "stall.check_interval_cycles",
            "check_interval_cycles must be > 0",
        ));
    }
    if config.stall.threshold == 0 {
        return Err(ContractError::config_validation(
            "stall.threshold",
            "threshold must be > 0",
        ));
    }
    Ok(())
}

/// 校验载波频率列表
fn validate_carriers(config: &StreamConfig) -> Result<(), ContractError> {
    if config.carrier_frequencies.is_empty() {
        return Err(ContractError::config_validation(
            "carrier_frequencies",
            "at least one carrier frequency is required",
        ));
    }
    let mut seen = HashSet::new();
    for (idx, carrier) in config.carrier_frequencies.iter().enumerate() {
        if !seen.insert(carrier) {
            return Err(ContractError::config_validation(
                format!("carrier_frequencies[{idx}]"),
                format!("duplicate carrier frequency {carrier}"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use contracts::StallConfig;

    use super::*;

    fn field_of(err: ContractError) -> String {
        match err {
            ContractError::ConfigValidation { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&StreamConfig::default()).is_ok());
    }

    #[test]
    fn test_lead_window_must_fit_ring() {
        let config = StreamConfig {
            buffer_count: 4,
            lead_window: 4,
            ..StreamConfig::default()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("must be > lead_window"));

        let config = StreamConfig {
            lead_window: 0,
            ..StreamConfig::default()
        };
        assert_eq!(field_of(validate(&config).unwrap_err()), "lead_window");
    }

    #[test]
    fn test_zero_packets_rejected() {
        let config = StreamConfig {
            packets_per_transfer: 0,
            ..StreamConfig::default()
        };
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "packets_per_transfer"
        );
    }

    #[test]
    fn test_timing_rejected() {
        let config = StreamConfig {
            poll_interval_us: 0,
            ..StreamConfig::default()
        };
        assert_eq!(field_of(validate(&config).unwrap_err()), "poll_interval_us");

        let config = StreamConfig {
            max_advance_steps: 0,
            ..StreamConfig::default()
        };
        assert_eq!(field_of(validate(&config).unwrap_err()), "max_advance_steps");
    }

    #[test]
    fn test_stall_rejected() {
        let config = StreamConfig {
            stall: StallConfig {
                check_interval_cycles: 0,
                threshold: 8,
            },
            ..StreamConfig::default()
        };
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "stall.check_interval_cycles"
        );
    }

    #[test]
    fn test_duplicate_carrier() {
        let config = StreamConfig {
            carrier_frequencies: vec![6, 8, 6],
            ..StreamConfig::default()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
        assert_eq!(field_of(err), "carrier_frequencies[2]");
    }

    #[test]
    fn test_empty_carriers() {
        let config = StreamConfig {
            carrier_frequencies: Vec::new(),
            ..StreamConfig::default()
        };
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "carrier_frequencies"
        );
    }
}
