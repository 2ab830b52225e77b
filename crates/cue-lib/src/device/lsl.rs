use super::BoardDriver;
use crate::error::{DeviceError, DeviceResult};
use crate::signal::{ChannelLayout, RawFrame, MOTION_AXES};
use ::lsl::{self, ChannelFormat, ProcessingOption, Pullable};
use std::collections::VecDeque;

/// Summary of a stream found on the network.
#[derive(Debug, Clone)]
pub struct LslStreamInfo {
    pub name: String,
    pub source_id: String,
    pub channels: i32,
    pub fs: f64,
}

pub fn discover(query: &str) -> DeviceResult<Vec<LslStreamInfo>> {
    let streams = lsl::resolve_byprop("type", query, 32, 2.0)
        .map_err(|err| DeviceError::connection(query, format!("stream discovery failed: {err:?}")))?;
    Ok(streams
        .into_iter()
        .map(|info| LslStreamInfo {
            name: info.stream_name(),
            source_id: info.source_id(),
            channels: info.channel_count(),
            fs: info.nominal_srate().max(0.0),
        })
        .collect())
}

/// Reads a wearable exposed as an LSL outlet. The last three channels of the
/// stream are the motion axes, everything before them is biosignal.
pub struct LslBoard {
    query: String,
    source_id: Option<String>,
    fs_hint: f64,
    chunk_size: usize,
    inlet: Option<lsl::StreamInlet>,
    format: Option<ChannelFormat>,
    width: usize,
    buffer: VecDeque<RawFrame>,
}

impl LslBoard {
    pub fn new(query: impl Into<String>, source_id: Option<String>, fs_hint: f64) -> Self {
        Self {
            query: query.into(),
            source_id,
            fs_hint,
            chunk_size: 64,
            inlet: None,
            format: None,
            width: 0,
            buffer: VecDeque::new(),
        }
    }

    fn resolve(&self) -> DeviceResult<lsl::StreamInfo> {
        if let Some(source_id) = &self.source_id {
            if let Ok(list) = lsl::resolve_byprop("source_id", source_id, 1, 5.0) {
                if let Some(info) = list.into_iter().next() {
                    return Ok(info);
                }
            }
        }
        lsl::resolve_byprop("type", &self.query, 1, 5.0)
            .map_err(|err| DeviceError::connection(self.name(), format!("{err:?}")))?
            .into_iter()
            .next()
            .ok_or_else(|| DeviceError::connection(self.name(), "no matching stream"))
    }

    fn split(&self, values: Vec<f64>) -> RawFrame {
        let split = self.width - MOTION_AXES;
        let mut motion = [0.0; MOTION_AXES];
        motion.copy_from_slice(&values[split..self.width]);
        let mut biosignal = values;
        biosignal.truncate(split);
        RawFrame { biosignal, motion }
    }

    fn fill(&mut self) -> DeviceResult<()> {
        let inlet = match &self.inlet {
            Some(inlet) => inlet,
            None => return Ok(()),
        };
        let rows: Vec<Vec<f64>> = match self.format {
            Some(ChannelFormat::Float32) => {
                let (chunk, _): (Vec<Vec<f32>>, _) = inlet
                    .pull_chunk()
                    .map_err(|err| DeviceError::acquisition(self.query.clone(), format!("{err:?}")))?;
                chunk
                    .into_iter()
                    .map(|row| row.into_iter().map(f64::from).collect())
                    .collect()
            }
            Some(ChannelFormat::Double64) => {
                let (chunk, _): (Vec<Vec<f64>>, _) = inlet
                    .pull_chunk()
                    .map_err(|err| DeviceError::acquisition(self.query.clone(), format!("{err:?}")))?;
                chunk
            }
            other => {
                return Err(DeviceError::acquisition(
                    self.query.clone(),
                    format!("unsupported channel format {other:?}"),
                ))
            }
        };
        for row in rows {
            if row.len() < self.width {
                return Err(DeviceError::acquisition(
                    self.query.clone(),
                    format!("short sample with {} values", row.len()),
                ));
            }
            let frame = self.split(row);
            self.buffer.push_back(frame);
        }
        Ok(())
    }
}

impl BoardDriver for LslBoard {
    fn name(&self) -> String {
        format!("lsl:{}", self.query)
    }

    fn connect(&mut self) -> DeviceResult<ChannelLayout> {
        let info = self.resolve()?;
        let width = info.channel_count().max(0) as usize;
        if width <= MOTION_AXES {
            return Err(DeviceError::connection(
                self.name(),
                format!("stream has {width} channels, need biosignal plus {MOTION_AXES} motion"),
            ));
        }
        let fs = if info.nominal_srate() > 0.0 {
            info.nominal_srate()
        } else {
            self.fs_hint
        };
        let name = info.stream_name();
        self.format = Some(info.channel_format());
        let inlet = lsl::StreamInlet::new(&info, self.chunk_size as i32, 0, true)
            .map_err(|err| DeviceError::connection(self.name(), format!("opening inlet: {err:?}")))?;
        inlet
            .set_postprocessing(&[
                ProcessingOption::ClockSync,
                ProcessingOption::Dejitter,
                ProcessingOption::Monotonize,
            ])
            .map_err(|err| DeviceError::connection(self.name(), format!("{err:?}")))?;
        self.inlet = Some(inlet);
        self.width = width;
        Ok(ChannelLayout::new(name, width - MOTION_AXES, fs))
    }

    fn begin_stream(&mut self) -> DeviceResult<()> {
        self.buffer.clear();
        Ok(())
    }

    fn pending(&mut self) -> DeviceResult<usize> {
        self.fill()?;
        Ok(self.buffer.len())
    }

    fn pull(&mut self, count: usize) -> DeviceResult<Vec<RawFrame>> {
        let take = count.min(self.buffer.len());
        Ok(self.buffer.drain(..take).collect())
    }

    fn end_stream(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> DeviceResult<()> {
        self.inlet = None;
        self.buffer.clear();
        Ok(())
    }
}
