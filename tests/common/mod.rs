//! Minimal CRAM 3.0 writer used to build test archives.
//!
//! Every data series is stored in its own raw or gzip external block; read
//! names use BYTE_ARRAY_STOP and inserted/clipped bases BYTE_ARRAY_LEN.
//! Slices may span several references, embed their reference span, or be
//! written without reference dependence (`RR` false).

#![allow(dead_code)]

use cramr::IndexEntry;
use flate2::Compression;
use flate2::write::GzEncoder;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

const INT_SERIES: [&[u8; 2]; 15] = [
    b"BF", b"CF", b"RI", b"RL", b"AP", b"RG", b"TL", b"FN", b"FC", b"FP", b"BS", b"BA", b"QS",
    b"DL", b"MQ",
];
const NAME_ID: i32 = 40;
const ARRAY_LEN_ID: i32 = 41;
const ARRAY_VALUES_ID: i32 = 42;
const EMBEDDED_REFERENCE_ID: i32 = 43;

/// Slice reference id marking a slice whose reads span several references.
pub const MULTI_REFERENCE: i32 = -2;

pub fn itf8(v: i32) -> Vec<u8> {
    let u = v as u32;
    if u < 0x80 {
        vec![u as u8]
    } else if u < 0x4000 {
        vec![0x80 | (u >> 8) as u8, u as u8]
    } else if u < 0x20_0000 {
        vec![0xc0 | (u >> 16) as u8, (u >> 8) as u8, u as u8]
    } else if u < 0x1000_0000 {
        vec![0xe0 | (u >> 24) as u8, (u >> 16) as u8, (u >> 8) as u8, u as u8]
    } else {
        vec![
            0xf0 | (u >> 28) as u8,
            (u >> 20) as u8,
            (u >> 12) as u8,
            (u >> 4) as u8,
            (u & 0x0f) as u8,
        ]
    }
}

pub fn ltf8(v: i64) -> Vec<u8> {
    let u = v as u64;
    if u < 0x80 {
        vec![u as u8]
    } else if u < 0x4000 {
        vec![0x80 | (u >> 8) as u8, u as u8]
    } else if u < 0x20_0000 {
        vec![0xc0 | (u >> 16) as u8, (u >> 8) as u8, u as u8]
    } else if u < 0x1000_0000 {
        vec![0xe0 | (u >> 24) as u8, (u >> 16) as u8, (u >> 8) as u8, u as u8]
    } else {
        let mut out = vec![0xff];
        out.extend_from_slice(&u.to_be_bytes());
        out
    }
}

fn byte_array(data: &[u8]) -> Vec<u8> {
    let mut out = itf8(data.len() as i32);
    out.extend_from_slice(data);
    out
}

fn encoding(codec: i32, params: &[u8]) -> Vec<u8> {
    let mut out = itf8(codec);
    out.extend(byte_array(params));
    out
}

fn external(content_id: i32) -> Vec<u8> {
    encoding(1, &itf8(content_id))
}

fn series_id(key: &[u8; 2]) -> i32 {
    INT_SERIES
        .iter()
        .position(|k| *k == key)
        .expect("unknown data series") as i32
        + 1
}

/// Read base for substitution `code` against `reference_base` under the
/// default substitution matrix.
pub fn substitute(reference_base: u8, code: u8) -> u8 {
    let alternatives: Vec<u8> = b"ACGTN"
        .iter()
        .copied()
        .filter(|&b| b != reference_base)
        .collect();
    alternatives[code as usize]
}

#[derive(Debug, Clone)]
pub enum Feature {
    Substitution { pos: i32, code: u8 },
    Insertion { pos: i32, bases: Vec<u8> },
    Deletion { pos: i32, len: i32 },
    SoftClip { pos: i32, bases: Vec<u8> },
    ReadBase { pos: i32, base: u8, score: u8 },
}

impl Feature {
    fn pos(&self) -> i32 {
        match self {
            Feature::Substitution { pos, .. }
            | Feature::Insertion { pos, .. }
            | Feature::Deletion { pos, .. }
            | Feature::SoftClip { pos, .. }
            | Feature::ReadBase { pos, .. } => *pos,
        }
    }

    /// Reference bases consumed minus read bases consumed.
    fn ref_delta(&self) -> i64 {
        match self {
            Feature::Insertion { bases, .. } | Feature::SoftClip { bases, .. } => {
                -(bases.len() as i64)
            }
            Feature::Deletion { len, .. } => *len as i64,
            Feature::Substitution { .. } | Feature::ReadBase { .. } => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestRead {
    pub name: String,
    /// Only consulted for reads in multi-reference slices.
    pub sequence_id: i32,
    pub start: i64,
    pub read_length: i32,
    pub features: Vec<Feature>,
}

impl TestRead {
    pub fn new(name: impl Into<String>, start: i64, read_length: i32) -> Self {
        Self {
            name: name.into(),
            sequence_id: 0,
            start,
            read_length,
            features: Vec::new(),
        }
    }

    pub fn on_sequence(mut self, sequence_id: i32) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self.features.sort_by_key(Feature::pos);
        self
    }

    pub fn reference_span(&self) -> i64 {
        self.read_length as i64 + self.features.iter().map(Feature::ref_delta).sum::<i64>()
    }

    pub fn end(&self) -> i64 {
        self.start + self.reference_span() - 1
    }

    /// Bases the read should decode to against `reference` (whole sequence).
    pub fn expected_sequence(&self, reference: &[u8]) -> Vec<u8> {
        self.sequence_with(|pos| reference[(pos - 1) as usize].to_ascii_uppercase())
    }

    /// Bases the read should decode to when the archive stores no reference
    /// dependence: every reference-derived base reads `N`.
    pub fn expected_sequence_without_reference(&self) -> Vec<u8> {
        self.sequence_with(|_| b'N')
    }

    fn sequence_with(&self, base_at: impl Fn(i64) -> u8) -> Vec<u8> {
        let mut sequence = Vec::new();
        let mut ref_pos = self.start;

        for feature in &self.features {
            while sequence.len() < (feature.pos() - 1) as usize {
                sequence.push(base_at(ref_pos));
                ref_pos += 1;
            }
            match feature {
                Feature::Substitution { code, .. } => {
                    sequence.push(substitute(base_at(ref_pos), *code));
                    ref_pos += 1;
                }
                Feature::ReadBase { base, .. } => {
                    sequence.push(*base);
                    ref_pos += 1;
                }
                Feature::Insertion { bases, .. } | Feature::SoftClip { bases, .. } => {
                    sequence.extend_from_slice(bases);
                }
                Feature::Deletion { len, .. } => ref_pos += *len as i64,
            }
        }
        while sequence.len() < self.read_length as usize {
            sequence.push(base_at(ref_pos));
            ref_pos += 1;
        }
        sequence
    }
}

#[derive(Debug, Clone)]
pub struct TestSlice {
    pub sequence_id: i32,
    pub reads: Vec<TestRead>,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Gzip external blocks.
    pub gzip: bool,
    /// Store external blocks raw but label them with this method id.
    pub external_method: Option<u8>,
    /// Store each single-reference slice's reference span in the slice.
    pub embed_reference: bool,
    /// Write `RR` false in the preservation map.
    pub reference_not_required: bool,
}

pub struct TestArchive {
    pub data: Vec<u8>,
    pub entries: Vec<IndexEntry>,
}

impl TestArchive {
    pub fn crai(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{}\t{}\t{}\t{}\t{}\t{}\n",
                    e.sequence_id,
                    e.alignment_start,
                    e.alignment_span,
                    e.container_offset,
                    e.slice_offset,
                    e.slice_size
                )
            })
            .collect()
    }

    /// Gzip-compressed CRAI text, as samtools writes it.
    pub fn crai_gz(&self) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(self.crai().as_bytes()).unwrap();
        encoder.finish().unwrap()
    }
}

fn block(method: u8, content_type: u8, content_id: i32, raw: &[u8], stored: &[u8]) -> Vec<u8> {
    let mut out = vec![method, content_type];
    out.extend(itf8(content_id));
    out.extend(itf8(stored.len() as i32));
    out.extend(itf8(raw.len() as i32));
    out.extend_from_slice(stored);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn raw_block(content_type: u8, content_id: i32, data: &[u8]) -> Vec<u8> {
    block(0, content_type, content_id, data, data)
}

fn external_block(content_id: i32, data: &[u8], options: &WriteOptions) -> Vec<u8> {
    if let Some(method) = options.external_method {
        return block(method, 4, content_id, data, data);
    }
    if options.gzip {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        return block(1, 4, content_id, data, &encoder.finish().unwrap());
    }
    raw_block(4, content_id, data)
}

#[allow(clippy::too_many_arguments)]
fn container_header(
    length: usize,
    reference_sequence_id: i32,
    alignment_start: i64,
    alignment_span: i64,
    record_count: i32,
    record_counter: i64,
    bases: i64,
    block_count: i32,
    landmarks: &[i32],
) -> Vec<u8> {
    let mut out = (length as i32).to_le_bytes().to_vec();
    out.extend(itf8(reference_sequence_id));
    out.extend(itf8(alignment_start as i32));
    out.extend(itf8(alignment_span as i32));
    out.extend(itf8(record_count));
    out.extend(ltf8(record_counter));
    out.extend(ltf8(bases));
    out.extend(itf8(block_count));
    out.extend(itf8(landmarks.len() as i32));
    for &landmark in landmarks {
        out.extend(itf8(landmark));
    }
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn compression_header(options: &WriteOptions) -> Vec<u8> {
    let reference_required = !options.reference_not_required as u8;
    let mut preservation = itf8(4);
    for (key, value) in [(b"RN", 1u8), (b"AP", 1), (b"RR", reference_required)] {
        preservation.extend_from_slice(key);
        preservation.push(value);
    }
    preservation.extend_from_slice(b"TD");
    preservation.extend(byte_array(&[0]));

    let mut series = itf8(INT_SERIES.len() as i32 + 3);
    for key in INT_SERIES {
        series.extend_from_slice(key);
        series.extend(external(series_id(key)));
    }
    series.extend_from_slice(b"RN");
    let mut stop = vec![0u8];
    stop.extend(itf8(NAME_ID));
    series.extend(encoding(5, &stop));
    for key in [b"IN", b"SC"] {
        series.extend_from_slice(key);
        let mut params = external(ARRAY_LEN_ID);
        params.extend(external(ARRAY_VALUES_ID));
        series.extend(encoding(4, &params));
    }

    let mut out = byte_array(&preservation);
    out.extend(byte_array(&series));
    out.extend(byte_array(&itf8(0)));
    out
}

#[derive(Default)]
struct Streams(BTreeMap<i32, Vec<u8>>);

impl Streams {
    fn int(&mut self, key: &[u8; 2], v: i32) {
        self.0.entry(series_id(key)).or_default().extend(itf8(v));
    }

    fn byte(&mut self, key: &[u8; 2], b: u8) {
        self.0.entry(series_id(key)).or_default().push(b);
    }

    fn name(&mut self, name: &str) {
        let stream = self.0.entry(NAME_ID).or_default();
        stream.extend_from_slice(name.as_bytes());
        stream.push(0);
    }

    fn array(&mut self, bytes: &[u8]) {
        self.0
            .entry(ARRAY_LEN_ID)
            .or_default()
            .extend(itf8(bytes.len() as i32));
        self.0
            .entry(ARRAY_VALUES_ID)
            .or_default()
            .extend_from_slice(bytes);
    }
}

struct EncodedSlice {
    data: Vec<u8>,
    alignment_start: i64,
    alignment_span: i64,
    block_count: i32,
}

fn encode_slice(
    slice: &TestSlice,
    record_counter: i64,
    references: &[Vec<u8>],
    options: &WriteOptions,
) -> EncodedSlice {
    let multi_reference = slice.sequence_id == MULTI_REFERENCE;
    let start = slice.reads.iter().map(|r| r.start).min().unwrap_or(1);
    let end = slice.reads.iter().map(TestRead::end).max().unwrap_or(start);
    let span = end - start + 1;
    // Multi-reference slices carry no span of their own and no MD5.
    let (header_start, header_span) = if multi_reference { (0, 0) } else { (start, span) };

    let mut streams = Streams::default();
    let mut prev_start = header_start;
    for read in &slice.reads {
        streams.int(b"BF", 0);
        streams.int(b"CF", 0);
        if multi_reference {
            streams.int(b"RI", read.sequence_id);
        }
        streams.int(b"RL", read.read_length);
        streams.int(b"AP", (read.start - prev_start) as i32);
        prev_start = read.start;
        streams.int(b"RG", -1);
        streams.name(&read.name);
        streams.int(b"TL", 0);
        streams.int(b"FN", read.features.len() as i32);

        let mut prev_pos = 0;
        for feature in &read.features {
            let pos = feature.pos();
            match feature {
                Feature::Substitution { code, .. } => {
                    streams.byte(b"FC", b'X');
                    streams.int(b"FP", pos - prev_pos);
                    streams.byte(b"BS", *code);
                }
                Feature::Insertion { bases, .. } => {
                    streams.byte(b"FC", b'I');
                    streams.int(b"FP", pos - prev_pos);
                    streams.array(bases);
                }
                Feature::Deletion { len, .. } => {
                    streams.byte(b"FC", b'D');
                    streams.int(b"FP", pos - prev_pos);
                    streams.int(b"DL", *len);
                }
                Feature::SoftClip { bases, .. } => {
                    streams.byte(b"FC", b'S');
                    streams.int(b"FP", pos - prev_pos);
                    streams.array(bases);
                }
                Feature::ReadBase { base, score, .. } => {
                    streams.byte(b"FC", b'B');
                    streams.int(b"FP", pos - prev_pos);
                    streams.byte(b"BA", *base);
                    streams.byte(b"QS", *score);
                }
            }
            prev_pos = pos;
        }
        streams.int(b"MQ", 60);
    }

    let md5 = if multi_reference {
        [0u8; 16]
    } else {
        let reference = &references[slice.sequence_id as usize];
        let begin = (start - 1) as usize;
        let end = (begin + span as usize).min(reference.len());
        if options.embed_reference {
            streams.0.insert(EMBEDDED_REFERENCE_ID, reference[begin..end].to_vec());
        }
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&Md5::digest(reference[begin..end].to_ascii_uppercase()));
        digest
    };
    let embedded_reference_id = if streams.0.contains_key(&EMBEDDED_REFERENCE_ID) {
        EMBEDDED_REFERENCE_ID
    } else {
        -1
    };

    let mut content_ids = vec![0];
    content_ids.extend(streams.0.keys().copied());
    let block_count = content_ids.len() as i32;

    let mut header = itf8(slice.sequence_id);
    header.extend(itf8(header_start as i32));
    header.extend(itf8(header_span as i32));
    header.extend(itf8(slice.reads.len() as i32));
    header.extend(ltf8(record_counter));
    header.extend(itf8(block_count));
    header.extend(itf8(content_ids.len() as i32));
    for &id in &content_ids {
        header.extend(itf8(id));
    }
    header.extend(itf8(embedded_reference_id));
    header.extend_from_slice(&md5);

    let mut data = raw_block(2, 0, &header);
    data.extend(raw_block(5, 0, &[]));
    for (&id, stream) in &streams.0 {
        data.extend(external_block(id, stream, options));
    }

    EncodedSlice {
        data,
        alignment_start: start,
        alignment_span: span,
        block_count: block_count + 1,
    }
}

/// CRAI lines for one slice: one per reference it holds.
fn index_entries(
    slice: &TestSlice,
    encoded: &EncodedSlice,
    container_offset: u64,
    slice_offset: u64,
) -> Vec<IndexEntry> {
    let entry = |sequence_id, alignment_start, alignment_span| IndexEntry {
        sequence_id,
        alignment_start,
        alignment_span,
        container_offset,
        slice_offset,
        slice_size: encoded.data.len() as u64,
    };

    if slice.sequence_id != MULTI_REFERENCE {
        return vec![entry(slice.sequence_id, encoded.alignment_start, encoded.alignment_span)];
    }

    let mut spans: BTreeMap<i32, (i64, i64)> = BTreeMap::new();
    for read in &slice.reads {
        let span = spans.entry(read.sequence_id).or_insert((read.start, read.end()));
        span.0 = span.0.min(read.start);
        span.1 = span.1.max(read.end());
    }
    spans
        .into_iter()
        .map(|(id, (start, end))| entry(id, start, end - start + 1))
        .collect()
}

/// Write a CRAM 3.0 archive with one container per element of `containers`.
///
/// `references[i]` is the full sequence with id `i`; it feeds the slice
/// reference MD5s and embedded references.
pub fn write_archive(
    sam_header: &str,
    references: &[Vec<u8>],
    containers: &[Vec<TestSlice>],
    options: &WriteOptions,
) -> TestArchive {
    let mut data = b"CRAM".to_vec();
    data.extend_from_slice(&[3, 0]);
    data.extend_from_slice(&[0u8; 20]);

    let mut text = (sam_header.len() as i32).to_le_bytes().to_vec();
    text.extend_from_slice(sam_header.as_bytes());
    let header_block = raw_block(0, 0, &text);
    data.extend(container_header(header_block.len(), 0, 0, 0, 0, 0, 0, 1, &[]));
    data.extend(header_block);

    let mut entries = Vec::new();
    let mut record_counter = 0i64;

    for slices in containers {
        let container_offset = data.len() as u64;
        let mut body = raw_block(1, 0, &compression_header(options));
        let mut landmarks = Vec::new();
        let mut block_count = 1;
        let mut records = 0;
        let mut bases = 0i64;
        let mut first_start = i64::MAX;
        let mut last_end = 0;

        for slice in slices {
            let encoded = encode_slice(slice, record_counter, references, options);
            landmarks.push(body.len() as i32);
            entries.extend(index_entries(slice, &encoded, container_offset, body.len() as u64));

            first_start = first_start.min(encoded.alignment_start);
            last_end = last_end.max(encoded.alignment_start + encoded.alignment_span);
            block_count += encoded.block_count;
            records += slice.reads.len() as i32;
            bases += slice.reads.iter().map(|r| r.read_length as i64).sum::<i64>();
            record_counter += slice.reads.len() as i64;
            body.extend(encoded.data);
        }

        let reference_sequence_id = match slices.first() {
            Some(first) if slices.iter().all(|s| s.sequence_id == first.sequence_id) => {
                first.sequence_id
            }
            Some(_) => MULTI_REFERENCE,
            None => -1,
        };
        data.extend(container_header(
            body.len(),
            reference_sequence_id,
            first_start,
            last_end - first_start,
            records,
            record_counter - records as i64,
            bases,
            block_count,
            &landmarks,
        ));
        data.extend(body);
    }

    TestArchive { data, entries }
}

/// Write `sequences` as a FASTA with `line_bases` bases per line, plus its
/// `.fai` next to it.
pub fn write_fasta(path: &Path, sequences: &[(&str, &[u8])], line_bases: usize) {
    let mut fasta = Vec::new();
    let mut fai = String::new();

    for (name, bases) in sequences {
        fasta.extend_from_slice(format!(">{}\n", name).as_bytes());
        let offset = fasta.len();
        for line in bases.chunks(line_bases) {
            fasta.extend_from_slice(line);
            fasta.push(b'\n');
        }
        fai.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            name,
            bases.len(),
            offset,
            line_bases,
            line_bases + 1
        ));
    }

    std::fs::write(path, fasta).unwrap();
    std::fs::write(format!("{}.fai", path.display()), fai).unwrap();
}
