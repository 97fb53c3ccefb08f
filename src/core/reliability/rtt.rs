//! An estimator for the round-trip time (RTT).
//! RTT 估算器。

/// Upper bound on the RTO before the final 5/4 scaling, in milliseconds.
const MAX_RTO_MS: u32 = 10_000;
/// A peer-advertised RTO is adopted at most this often, in milliseconds.
const PEER_RTO_UPDATE_INTERVAL_MS: u32 = 3_000;

/// Round-trip statistics of a connection, based on RFC 6298 with integer
/// millisecond arithmetic.
///
/// 连接的往返统计信息，基于 RFC 6298，使用整数毫秒运算。
#[derive(Debug, Clone)]
pub struct RoundTripInfo {
    /// RTT variation, in milliseconds.
    /// 往返时间变化量（毫秒）。
    variation: u32,
    /// Smoothed RTT, in milliseconds. Zero until the first sample.
    /// 平滑的往返时间（毫秒）。首个样本前为零。
    srtt: u32,
    /// The retransmission timeout, in milliseconds.
    rto: u32,
    /// Floor for the smoothed RTT.
    min_rtt: u32,
    /// Connection clock of the last RTO change.
    updated_timestamp: u32,
}

impl RoundTripInfo {
    /// Creates an estimator with an initial RTO and a smoothed-RTT floor.
    ///
    /// 使用初始 RTO 和平滑 RTT 下限创建估算器。
    pub fn new(initial_rto: u32, min_rtt: u32) -> Self {
        Self {
            variation: 0,
            srtt: 0,
            rto: initial_rto,
            min_rtt,
            updated_timestamp: 0,
        }
    }

    /// Feeds a new RTT sample measured at `current`.
    ///
    /// 输入一个在 `current` 时刻测得的新 RTT 样本。
    pub fn update(&mut self, rtt: u32, current: u32) {
        if rtt > 0x7FFF_FFFF {
            return;
        }

        if self.srtt == 0 {
            // First sample
            self.srtt = rtt;
            self.variation = rtt / 2;
        } else {
            let delta = self.srtt.abs_diff(rtt);
            self.variation = (3 * self.variation + delta) / 4;
            self.srtt = (7 * self.srtt + rtt) / 8;
            if self.srtt < self.min_rtt {
                self.srtt = self.min_rtt;
            }
        }

        let rto = if self.min_rtt < 4 * self.variation {
            self.srtt + 4 * self.variation
        } else {
            self.srtt + self.variation
        };
        self.rto = rto.min(MAX_RTO_MS) * 5 / 4;
        self.updated_timestamp = current;
    }

    /// Adopts the RTO advertised by the peer, unless the RTO changed recently.
    ///
    /// 采用对端通告的 RTO，除非 RTO 最近刚更新过。
    pub fn update_peer_rto(&mut self, rto: u32, current: u32) {
        if current.wrapping_sub(self.updated_timestamp) < PEER_RTO_UPDATE_INTERVAL_MS {
            return;
        }
        self.updated_timestamp = current;
        self.rto = rto;
    }

    /// Returns the current RTO in milliseconds.
    ///
    /// 返回当前的 RTO（毫秒）。
    pub fn timeout(&self) -> u32 {
        self.rto
    }

    /// Returns the smoothed RTT in milliseconds.
    pub fn smoothed_time(&self) -> u32 {
        self.srtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_estimator_initialization() {
        let estimator = RoundTripInfo::new(100, 50);
        assert_eq!(estimator.timeout(), 100);
        assert_eq!(estimator.smoothed_time(), 0);
    }

    #[test]
    fn test_rtt_estimator_first_sample() {
        let mut estimator = RoundTripInfo::new(100, 10);
        estimator.update(100, 0);

        assert_eq!(estimator.smoothed_time(), 100);
        assert_eq!(estimator.variation, 50);
        // min_rtt < 4 * variation: (100 + 200) * 5 / 4
        assert_eq!(estimator.timeout(), 375);
    }

    #[test]
    fn test_rtt_estimator_subsequent_samples() {
        let mut estimator = RoundTripInfo::new(100, 10);
        estimator.update(100, 0);

        // Stable RTT
        estimator.update(100, 10);
        assert_eq!(estimator.smoothed_time(), 100);
        assert_eq!(estimator.variation, 37);
        assert_eq!(estimator.timeout(), (100 + 4 * 37) * 5 / 4);

        // RTT increases
        estimator.update(200, 20);
        assert_eq!(estimator.smoothed_time(), 112);
        assert_eq!(estimator.variation, 52);
        assert_eq!(estimator.timeout(), (112 + 4 * 52) * 5 / 4);
    }

    #[test]
    fn test_rtt_floor_enforced() {
        let mut estimator = RoundTripInfo::new(100, 50);
        estimator.update(10, 0);
        estimator.update(10, 1);
        assert_eq!(estimator.smoothed_time(), 50);
    }

    #[test]
    fn test_rto_is_capped() {
        let mut estimator = RoundTripInfo::new(100, 10);
        estimator.update(60_000, 0);
        assert_eq!(estimator.timeout(), MAX_RTO_MS * 5 / 4);
    }

    #[test]
    fn test_out_of_range_sample_ignored() {
        let mut estimator = RoundTripInfo::new(100, 10);
        estimator.update(0x8000_0000, 0);
        assert_eq!(estimator.smoothed_time(), 0);
        assert_eq!(estimator.timeout(), 100);
    }

    #[test]
    fn test_constant_samples_converge() {
        let mut estimator = RoundTripInfo::new(100, 10);
        let mut previous_rto = None;
        for i in 0..200u32 {
            estimator.update(80, i * 10);
            let rto = estimator.timeout();
            assert!(rto <= MAX_RTO_MS * 5 / 4);
            if let Some(prev) = previous_rto {
                // Variation only decays for a constant stream, so the RTO never rises.
                assert!(rto <= prev, "rto oscillated: {} -> {}", prev, rto);
            }
            previous_rto = Some(rto);
        }
        assert_eq!(estimator.smoothed_time(), 80);
        // Once variation is small relative to the floor, RTO = (srtt + var) * 5 / 4.
        assert_eq!(estimator.timeout(), 80 * 5 / 4);
    }

    #[test]
    fn test_peer_rto_rate_limited() {
        let mut estimator = RoundTripInfo::new(100, 10);
        estimator.update(100, 1_000);
        let local = estimator.timeout();

        // Too soon after the local update.
        estimator.update_peer_rto(900, 2_000);
        assert_eq!(estimator.timeout(), local);

        estimator.update_peer_rto(900, 4_000);
        assert_eq!(estimator.timeout(), 900);

        // Too soon after the previous peer update.
        estimator.update_peer_rto(700, 5_000);
        assert_eq!(estimator.timeout(), 900);
    }
}
