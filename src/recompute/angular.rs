//! Angular accuracy and precision
//!
//! Gaze and target positions are azimuth/elevation angles in degrees. Offsets
//! are great-circle angles between the two directions.

use super::{MetricsRecomputer, MetricsResult, RecomputeConfig};
use crate::error::AnalysisError;
use crate::stats::{defined, mean, rms, std_dev};
use crate::types::{GazeSample, RawSessionRecord, SampleRecord, TargetDescriptor, TargetResult};
use std::collections::BTreeMap;

/// Recomputes metrics from per-sample gaze angles
#[derive(Debug, Clone, Copy, Default)]
pub struct AngularRecomputer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Combined,
    Left,
    Right,
}

impl Channel {
    const ALL: [Channel; 3] = [Channel::Combined, Channel::Left, Channel::Right];

    fn suffix(&self) -> &'static str {
        match self {
            Channel::Combined => "",
            Channel::Left => "_L",
            Channel::Right => "_R",
        }
    }

    fn repeat_key(&self) -> &'static str {
        match self {
            Channel::Combined => "repeated_C",
            Channel::Left => "repeated_L",
            Channel::Right => "repeated_R",
        }
    }

    fn point(&self, sample: &GazeSample) -> Option<(f64, f64)> {
        let (x, y) = match self {
            Channel::Combined => (sample.gaze_x, sample.gaze_y),
            Channel::Left => (sample.gaze_x_left, sample.gaze_y_left),
            Channel::Right => (sample.gaze_x_right, sample.gaze_y_right),
        };
        x.zip(y)
    }
}

impl MetricsRecomputer for AngularRecomputer {
    fn recompute(
        &self,
        record: &RawSessionRecord,
        config: &RecomputeConfig,
    ) -> Result<MetricsResult, AnalysisError> {
        if config.start_sample > config.end_sample {
            return Err(AnalysisError::Configuration(format!(
                "sample window {}..={} is empty",
                config.start_sample, config.end_sample
            )));
        }

        let mut per_target: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut ipd_values = Vec::new();
        let mut samples_out = Vec::new();
        let mut targets_out = Vec::new();

        for (index, (target, samples)) in record.targets.iter().zip(&record.samples).enumerate() {
            if let Some((bound_x, bound_y)) = config.inner_field {
                if target.x.abs() > bound_x || target.y.abs() > bound_y {
                    continue;
                }
            }

            let window: Vec<(usize, &GazeSample)> = samples
                .iter()
                .enumerate()
                .filter(|(i, _)| config.includes_sample(*i))
                .filter(|(_, s)| !config.skip_missing_eye || has_both_eyes(s))
                .collect();

            let mut metrics = BTreeMap::new();
            let mut n_samples = 0;
            for channel in Channel::ALL {
                let points = included_points(channel, target, &window, config);
                if channel == Channel::Combined {
                    n_samples = points.len();
                }
                channel_metrics(channel, target, &points, &mut metrics);
            }
            count_repeats(samples, &window, &mut metrics);

            for (_, sample) in &window {
                if let Some(ipd) = sample.ipd {
                    ipd_values.push(ipd);
                }
            }
            samples_out.extend(
                window
                    .iter()
                    .map(|(i, s)| sample_record(index, *i, target, s)),
            );

            targets_out.push(TargetResult {
                target_index: index,
                x: target.x,
                y: target.y,
                d: target.d,
                acc: metrics.get("acc").copied(),
                sd: metrics.get("sd").copied(),
                rmsi: metrics.get("rmsi").copied(),
                repeated: metrics.get("repeated").copied(),
                n_samples,
            });

            for (key, value) in metrics {
                per_target.entry(key.to_string()).or_default().push(value);
            }
        }

        let mut results = BTreeMap::new();
        for (key, values) in per_target {
            let value = if key.starts_with("repeated") {
                values.iter().sum()
            } else {
                config.aggregation.reduce(&values)
            };
            if let Some(v) = defined(value) {
                results.insert(key, v);
            }
        }
        if let Some(ipd) = defined(mean(&ipd_values)) {
            results.insert("ipd".to_string(), ipd);
        }
        results.insert("start_sample".to_string(), config.start_sample as f64);
        results.insert("end_sample".to_string(), config.end_sample as f64);

        Ok(MetricsResult {
            results,
            samples: samples_out,
            targets: targets_out,
        })
    }
}

fn has_both_eyes(sample: &GazeSample) -> bool {
    Channel::Left.point(sample).is_some() && Channel::Right.point(sample).is_some()
}

/// Points of one channel that pass the outlier threshold, with their offsets
fn included_points(
    channel: Channel,
    target: &TargetDescriptor,
    window: &[(usize, &GazeSample)],
    config: &RecomputeConfig,
) -> Vec<((f64, f64), f64)> {
    window
        .iter()
        .filter_map(|(_, s)| channel.point(s))
        .map(|p| (p, angular_distance(p, (target.x, target.y))))
        .filter(|(_, offset)| {
            config
                .outlier_threshold_deg
                .map_or(true, |threshold| *offset <= threshold)
        })
        .collect()
}

fn channel_metrics(
    channel: Channel,
    target: &TargetDescriptor,
    points: &[((f64, f64), f64)],
    out: &mut BTreeMap<&'static str, f64>,
) {
    if points.is_empty() {
        return;
    }
    let xs: Vec<f64> = points.iter().map(|((x, _), _)| *x).collect();
    let ys: Vec<f64> = points.iter().map(|((_, y), _)| *y).collect();
    let offsets: Vec<f64> = points.iter().map(|(_, o)| *o).collect();

    let acc_x = mean(&xs.iter().map(|x| (x - target.x).abs()).collect::<Vec<_>>());
    let acc_y = mean(&ys.iter().map(|y| (y - target.y).abs()).collect::<Vec<_>>());
    let sd_x = std_dev(&xs);
    let sd_y = std_dev(&ys);

    let mut put = |name: &str, value: f64| {
        if let Some(key) = metric_key(name, channel) {
            out.insert(key, value);
        }
    };
    put("acc", mean(&offsets));
    put("accX", acc_x);
    put("accY", acc_y);
    put("sdX", sd_x);
    put("sdY", sd_y);
    put("sd", (sd_x * sd_x + sd_y * sd_y).sqrt());

    if points.len() >= 2 {
        let steps: Vec<f64> = points
            .windows(2)
            .map(|w| angular_distance(w[0].0, w[1].0))
            .collect();
        let dx: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
        let dy: Vec<f64> = ys.windows(2).map(|w| w[1] - w[0]).collect();
        put("rmsi", rms(&steps));
        put("rmsiX", rms(&dx));
        put("rmsiY", rms(&dy));
    }
}

/// Static key for a metric on a channel, e.g. `accX` + left = `accX_L`
fn metric_key(name: &str, channel: Channel) -> Option<&'static str> {
    let key = format!("{}{}", name, channel.suffix());
    crate::types::METRIC_KEYS.iter().copied().find(|k| *k == key)
}

/// A channel sample is repeated when it equals the sample right before it.
fn count_repeats(
    samples: &[GazeSample],
    window: &[(usize, &GazeSample)],
    out: &mut BTreeMap<&'static str, f64>,
) {
    let mut per_channel = [0.0; 3];
    let mut all = 0.0;
    let mut any = 0.0;

    for (i, sample) in window {
        let Some(previous) = i.checked_sub(1).and_then(|p| samples.get(p)) else {
            continue;
        };
        let mut available = 0;
        let mut repeated = 0;
        for (c, channel) in Channel::ALL.iter().enumerate() {
            if let (Some(now), Some(before)) = (channel.point(sample), channel.point(previous)) {
                available += 1;
                if now == before {
                    repeated += 1;
                    per_channel[c] += 1.0;
                }
            }
        }
        if repeated > 0 {
            any += 1.0;
            if repeated == available {
                all += 1.0;
            }
        }
    }

    for (c, channel) in Channel::ALL.iter().enumerate() {
        out.insert(channel.repeat_key(), per_channel[c]);
    }
    out.insert("repeated", all);
    out.insert("repeated_any", any);
}

fn sample_record(
    target_index: usize,
    sample_index: usize,
    target: &TargetDescriptor,
    sample: &GazeSample,
) -> SampleRecord {
    let offset = |channel: Channel| {
        channel
            .point(sample)
            .map(|p| angular_distance(p, (target.x, target.y)))
    };
    SampleRecord {
        target_index,
        sample_index,
        tar_x: target.x,
        tar_y: target.y,
        tar_d: target.d,
        frame: sample.frame,
        time: sample.time,
        gaze_x: sample.gaze_x,
        gaze_y: sample.gaze_y,
        gaze_x_left: sample.gaze_x_left,
        gaze_y_left: sample.gaze_y_left,
        gaze_x_right: sample.gaze_x_right,
        gaze_y_right: sample.gaze_y_right,
        acc: offset(Channel::Combined),
        acc_left: offset(Channel::Left),
        acc_right: offset(Channel::Right),
    }
}

/// Unit direction vector for an azimuth/elevation pair in degrees
fn direction(azimuth_deg: f64, elevation_deg: f64) -> [f64; 3] {
    let (az, el) = (azimuth_deg.to_radians(), elevation_deg.to_radians());
    [el.cos() * az.sin(), el.sin(), el.cos() * az.cos()]
}

/// Great-circle angle between two directions, in degrees
pub(crate) fn angular_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let u = direction(a.0, a.1);
    let v = direction(b.0, b.1);
    let dot = u[0] * v[0] + u[1] * v[1] + u[2] * v[2];
    let cross = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let cross_norm = (cross[0].powi(2) + cross[1].powi(2) + cross[2].powi(2)).sqrt();
    cross_norm.atan2(dot).to_degrees()
}
