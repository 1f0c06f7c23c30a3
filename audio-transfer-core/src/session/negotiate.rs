use crate::models::audio_models::{HwParams, Layout, PeriodFormat, SampleFormat};
use crate::models::config::StreamConfig;
use crate::models::error::{DeviceFault, Result, TransferError};
use crate::traits::callback_client::CallbackClient;
use crate::traits::pcm_device::PcmDevice;

const LAYOUT_PREFERENCE: [Layout; 2] = [Layout::Interleaved, Layout::Planar];

/// Walk the format fallback chain, trying interleaved before planar for
/// each format, until `attempt` accepts a combination.
///
/// `DeviceFault::Rejected` moves on to the next combination; any other
/// fault aborts negotiation.
pub fn negotiate_with<T>(
    requested: SampleFormat,
    mut attempt: impl FnMut(SampleFormat, Layout) -> std::result::Result<T, DeviceFault>,
) -> Result<T> {
    let mut refusals = Vec::new();
    for format in requested.fallback_chain() {
        for layout in LAYOUT_PREFERENCE {
            match attempt(format, layout) {
                Ok(accepted) => {
                    if format != requested {
                        log::info!("{} refused, falling back to {}", requested, format);
                    }
                    return Ok(accepted);
                }
                Err(DeviceFault::Rejected(reason)) => {
                    log::debug!("{} {:?} rejected: {}", format, layout, reason);
                    refusals.push(format!("{} {:?}: {}", format, layout, reason));
                }
                Err(fault) => return Err(TransferError::DeviceNotAvailable(fault.to_string())),
            }
        }
    }
    Err(TransferError::NegotiationFailed(format!(
        "no format/layout accepted ({})",
        refusals.join("; ")
    )))
}

/// Configure a poll-driven device for `channels` channels.
pub fn negotiate_device<D: PcmDevice + ?Sized>(
    device: &mut D,
    config: &StreamConfig,
    channels: usize,
) -> Result<HwParams> {
    let accepted = negotiate_with(config.format, |format, layout| {
        device.configure(&HwParams {
            format,
            layout,
            channels,
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
            buffer_frames: config.buffer_frames(),
        })
    })?;

    if accepted.channels != channels {
        return Err(TransferError::NegotiationFailed(format!(
            "{} offers {} channels, {} requested",
            device.name(),
            accepted.channels,
            channels
        )));
    }
    if accepted.buffer_frames == 0 || accepted.period_frames == 0 {
        return Err(TransferError::NegotiationFailed(format!(
            "{} accepted an empty buffer",
            device.name()
        )));
    }
    if accepted.sample_rate != config.sample_rate {
        log::warn!(
            "{} runs at {} Hz instead of {} Hz",
            device.name(),
            accepted.sample_rate,
            config.sample_rate
        );
    }
    log::info!(
        "{}: {} {:?}, {} ch, {} Hz, period {} / buffer {} frames",
        device.name(),
        accepted.format,
        accepted.layout,
        accepted.channels,
        accepted.sample_rate,
        accepted.period_frames,
        accepted.buffer_frames
    );
    Ok(accepted)
}

/// Agree on a period format with a callback client.
pub fn negotiate_client<C: CallbackClient + ?Sized>(
    client: &mut C,
    config: &StreamConfig,
    playback_channels: usize,
    capture_channels: usize,
) -> Result<PeriodFormat> {
    let accepted = negotiate_with(config.format, |format, layout| {
        client.negotiate(&PeriodFormat {
            format,
            layout,
            playback_channels,
            capture_channels,
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
        })
    })?;

    if accepted.playback_channels != playback_channels || accepted.capture_channels != capture_channels {
        return Err(TransferError::NegotiationFailed(format!(
            "{} offers {}/{} channels, {}/{} requested",
            client.name(),
            accepted.playback_channels,
            accepted.capture_channels,
            playback_channels,
            capture_channels
        )));
    }
    if accepted.period_frames == 0 {
        return Err(TransferError::NegotiationFailed(format!(
            "{} reported an empty period",
            client.name()
        )));
    }
    log::info!(
        "{}: {} {:?}, {} Hz, period {} frames",
        client.name(),
        accepted.format,
        accepted.layout,
        accepted.sample_rate,
        accepted.period_frames
    );
    Ok(accepted)
}
