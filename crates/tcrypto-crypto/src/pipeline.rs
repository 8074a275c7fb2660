//! Transform pipeline: application map ⇄ payload bytes
//!
//! Stages run in attachment order on save and in reverse order on extract.
//! The first stage turns the map into bytes; later stages are byte-to-byte
//! (compression and the like). While a cipher is active, stages that are
//! not encryption compatible are skipped in both directions.

use std::collections::BTreeMap;

use serde_json::Value;
use tcrypto_core::EngineConfig;

use crate::error::{CryptoError, CryptoResult};

/// The application's key-value data.
pub type DataMap = BTreeMap<String, Value>;

/// Value flowing between stages.
#[derive(Debug, Clone, PartialEq)]
pub enum StageData {
    Map(DataMap),
    Bytes(Vec<u8>),
}

impl StageData {
    fn into_bytes(self, stage: &str) -> CryptoResult<Vec<u8>> {
        match self {
            StageData::Bytes(b) => Ok(b),
            StageData::Map(_) => Err(CryptoError::Transform(format!(
                "{stage}: expected bytes, got a map"
            ))),
        }
    }
}

pub trait TransformStage {
    fn name(&self) -> &'static str;

    fn forward(&self, data: StageData) -> CryptoResult<StageData>;

    fn backward(&self, data: StageData) -> CryptoResult<StageData>;

    /// Whether this stage may run on data that is about to be encrypted.
    fn is_encryption_compatible(&self) -> bool;
}

/// Map ⇄ JSON. The default first stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStage;

impl TransformStage for JsonStage {
    fn name(&self) -> &'static str {
        "json"
    }

    fn forward(&self, data: StageData) -> CryptoResult<StageData> {
        match data {
            StageData::Map(map) => serde_json::to_vec(&map)
                .map(StageData::Bytes)
                .map_err(|e| CryptoError::Transform(format!("json encode: {e}"))),
            StageData::Bytes(_) => Err(CryptoError::Transform(
                "json: expected a map, got bytes".into(),
            )),
        }
    }

    fn backward(&self, data: StageData) -> CryptoResult<StageData> {
        let bytes = data.into_bytes(self.name())?;
        serde_json::from_slice::<DataMap>(&bytes)
            .map(StageData::Map)
            .map_err(|e| CryptoError::Transform(format!("json decode: {e}")))
    }

    fn is_encryption_compatible(&self) -> bool {
        true
    }
}

/// zstd compression. Never runs while a cipher is active.
#[derive(Debug, Clone, Copy)]
pub struct CompressStage {
    level: i32,
}

impl CompressStage {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for CompressStage {
    fn default() -> Self {
        Self::new(3)
    }
}

impl TransformStage for CompressStage {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn forward(&self, data: StageData) -> CryptoResult<StageData> {
        let bytes = data.into_bytes(self.name())?;
        zstd::encode_all(bytes.as_slice(), self.level)
            .map(StageData::Bytes)
            .map_err(|e| CryptoError::Transform(format!("zstd compress: {e}")))
    }

    fn backward(&self, data: StageData) -> CryptoResult<StageData> {
        let bytes = data.into_bytes(self.name())?;
        zstd::decode_all(bytes.as_slice())
            .map(StageData::Bytes)
            .map_err(|e| CryptoError::Transform(format!("zstd decompress: {e}")))
    }

    fn is_encryption_compatible(&self) -> bool {
        false
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn TransformStage>>,
}

impl Pipeline {
    /// A pipeline whose first stage must serialize the map to bytes.
    pub fn new(first: Box<dyn TransformStage>) -> Self {
        Self {
            stages: vec![first],
        }
    }

    /// JSON, followed by zstd when `compress` is set.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut pipeline = Self::default();
        if config.compress {
            pipeline.attach(Box::new(CompressStage::new(config.compression_level)));
        }
        pipeline
    }

    pub fn attach(&mut self, stage: Box<dyn TransformStage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn with(mut self, stage: Box<dyn TransformStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Names of the stages that run for the given mode, in save order.
    pub fn active_stages(&self, encrypted: bool) -> Vec<&'static str> {
        self.active(encrypted).map(|s| s.name()).collect()
    }

    fn active(&self, encrypted: bool) -> impl DoubleEndedIterator<Item = &dyn TransformStage> {
        self.stages
            .iter()
            .map(|s| s.as_ref())
            .filter(move |s| !encrypted || s.is_encryption_compatible())
    }

    /// Map → payload bytes. `NoData` if the result is empty.
    pub fn forward(&self, map: &DataMap, encrypted: bool) -> CryptoResult<Vec<u8>> {
        let mut data = StageData::Map(map.clone());
        for stage in self.active(encrypted) {
            data = stage.forward(data)?;
        }

        match data {
            StageData::Bytes(bytes) if !bytes.is_empty() => Ok(bytes),
            StageData::Bytes(_) => Err(CryptoError::NoData),
            StageData::Map(_) => Err(CryptoError::Transform(
                "pipeline did not serialize the map".into(),
            )),
        }
    }

    /// Payload bytes → map, undoing `forward` stage by stage.
    pub fn backward(&self, bytes: Vec<u8>, encrypted: bool) -> CryptoResult<DataMap> {
        let mut data = StageData::Bytes(bytes);
        for stage in self.active(encrypted).rev() {
            data = stage.backward(data)?;
        }

        match data {
            StageData::Map(map) => Ok(map),
            StageData::Bytes(_) => Err(CryptoError::Transform(
                "pipeline did not produce a map".into(),
            )),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Box::new(JsonStage))
    }
}
