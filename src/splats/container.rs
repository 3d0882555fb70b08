//! Splat containers.
//!
//! A container owns the encoded records of one splat object and answers the
//! small capability set the rest of the engine needs: how many splats,
//! whether view-dependent color is present, and decoding one splat
//! (optionally evaluated toward a view origin).
//!
//! The three kinds are a sum type rather than a trait object, mirroring the
//! reader variants used elsewhere in the engine family.

use glam::Vec3;
use rustc_hash::FxHashMap;

use super::{Splat, encoding::SplatEncoding, sh};
use crate::settings::PAGE_SIZE;

/// A flat array of encoded splat records plus their packed SH words.
#[derive(Debug, Clone)]
pub struct SplatArray {
    encoding: SplatEncoding,
    sh_level: u8,
    count: usize,
    records: Vec<u8>,
    sh_words: Vec<u32>,
}

impl SplatArray {
    /// Creates an empty array for the given encoding and SH level.
    #[must_use]
    pub fn new(encoding: SplatEncoding, sh_level: u8) -> Self {
        Self {
            encoding,
            sh_level,
            count: 0,
            records: Vec::new(),
            sh_words: Vec::new(),
        }
    }

    /// Encodes `splats` (without SH data) into a new array.
    #[must_use]
    pub fn from_splats(encoding: SplatEncoding, splats: &[Splat]) -> Self {
        let mut array = Self::new(encoding, 0);
        for splat in splats {
            array.push(splat, &[]);
        }
        array
    }

    /// Appends one splat. `sh_coeffs` must hold exactly
    /// [`sh::coeff_count`] coefficients for this array's SH level.
    pub fn push(&mut self, splat: &Splat, sh_coeffs: &[[f32; 3]]) {
        debug_assert_eq!(sh_coeffs.len(), sh::coeff_count(self.sh_level));
        let record_size = self.encoding.bytes_per_splat();
        let offset = self.records.len();
        self.records.resize(offset + record_size, 0);
        self.encoding
            .encode_into(splat, &mut self.records[offset..offset + record_size]);

        let stride = sh::words_per_splat(self.sh_level);
        if stride > 0 {
            let base = self.sh_words.len();
            self.sh_words.resize(base + stride, 0);
            for (i, coeff) in sh_coeffs.iter().enumerate() {
                self.sh_words[base + i] = sh::pack_coeff(*coeff);
            }
        }
        self.count += 1;
    }

    /// Number of splats stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the array is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The record encoding of this array.
    #[must_use]
    pub fn encoding(&self) -> SplatEncoding {
        self.encoding
    }

    /// The SH level stored alongside the records.
    #[must_use]
    pub fn sh_level(&self) -> u8 {
        self.sh_level
    }

    /// Decodes splat `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Splat {
        let size = self.encoding.bytes_per_splat();
        self.encoding
            .decode(&self.records[index * size..(index + 1) * size])
            .expect("in-bounds record")
    }

    /// Unpacks the live SH coefficients of splat `index`.
    #[must_use]
    pub fn sh_coeffs(&self, index: usize) -> Vec<[f32; 3]> {
        let stride = sh::words_per_splat(self.sh_level);
        let live = sh::coeff_count(self.sh_level);
        self.sh_words[index * stride..index * stride + live]
            .iter()
            .map(|w| sh::unpack_coeff(*w))
            .collect()
    }

    /// The raw encoded record bytes.
    #[must_use]
    pub fn record_bytes(&self) -> &[u8] {
        &self.records
    }

    /// The raw packed SH words.
    #[must_use]
    pub fn sh_word_bytes(&self) -> &[u32] {
        &self.sh_words
    }
}

/// A paged container: total geometry is known from its header but records
/// are resident only for fetched chunks.
#[derive(Debug, Clone)]
pub struct PagedSplats {
    encoding: SplatEncoding,
    sh_level: u8,
    num_splats: u64,
    resident: FxHashMap<u32, SplatArray>,
}

impl PagedSplats {
    /// Creates a paged container with no resident chunks.
    #[must_use]
    pub fn new(encoding: SplatEncoding, sh_level: u8, num_splats: u64) -> Self {
        Self {
            encoding,
            sh_level,
            num_splats,
            resident: FxHashMap::default(),
        }
    }

    /// Makes a fetched chunk's records available.
    pub fn insert_chunk(&mut self, chunk: u32, records: SplatArray) {
        debug_assert_eq!(records.encoding(), self.encoding);
        self.resident.insert(chunk, records);
    }

    /// Drops an evicted chunk's records.
    pub fn remove_chunk(&mut self, chunk: u32) {
        self.resident.remove(&chunk);
    }

    /// Whether `chunk` is resident.
    #[must_use]
    pub fn is_resident(&self, chunk: u32) -> bool {
        self.resident.contains_key(&chunk)
    }

    fn fetch(&self, index: u64) -> Option<(&SplatArray, usize)> {
        let chunk = (index / u64::from(PAGE_SIZE)) as u32;
        let offset = (index % u64::from(PAGE_SIZE)) as usize;
        let array = self.resident.get(&chunk)?;
        (offset < array.len()).then_some((array, offset))
    }
}

/// One splat object's data, in whichever of the three forms it takes.
#[derive(Debug, Clone)]
pub enum SplatContainer {
    /// Fully resident, 16-byte records.
    Compact(SplatArray),
    /// Fully resident, 32-byte records.
    Extended(SplatArray),
    /// Streamed; records resident per chunk.
    Paged(PagedSplats),
}

impl SplatContainer {
    /// Total splat count (for paged containers, the count declared by the
    /// container header, resident or not).
    #[must_use]
    pub fn num_splats(&self) -> u64 {
        match self {
            Self::Compact(a) | Self::Extended(a) => a.len() as u64,
            Self::Paged(p) => p.num_splats,
        }
    }

    /// Whether splats carry view-dependent (SH) color.
    #[must_use]
    pub fn has_sh_direction(&self) -> bool {
        match self {
            Self::Compact(a) | Self::Extended(a) => a.sh_level() > 0,
            Self::Paged(p) => p.sh_level > 0,
        }
    }

    /// Decodes splat `index`. With a `view_origin`, SH color is evaluated
    /// in the direction from the origin to the splat and folded into the
    /// base color. Returns `None` for a paged splat whose chunk is not
    /// resident.
    #[must_use]
    pub fn fetch_splat(&self, index: u64, view_origin: Option<Vec3>) -> Option<Splat> {
        let (array, offset) = match self {
            Self::Compact(a) | Self::Extended(a) => {
                let offset = usize::try_from(index).ok()?;
                (offset < a.len()).then_some((a, offset))?
            }
            Self::Paged(p) => p.fetch(index)?,
        };

        let mut splat = array.get(offset);
        if let Some(origin) = view_origin
            && array.sh_level() > 0
        {
            let dir = (splat.center - origin).normalize_or_zero();
            let sh_rgb = sh::eval(array.sh_level(), &array.sh_coeffs(offset), dir);
            for (channel, add) in splat.color.iter_mut().zip(sh_rgb) {
                *channel = (*channel + add).max(0.0);
            }
        }
        Some(splat)
    }
}
