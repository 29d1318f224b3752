//! Integration tests for the cuantizar pipeline.
//!
//! These tests drive end-to-end workflows: build a container, parse it
//! back, convert it into the fixed-block output format, and multiply
//! against the packed weights.

use cuantizar::codec::{quantize, QuantizedTensor};
use cuantizar::gguf::TensorDescriptor;
use cuantizar::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_values(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn build_model(rng: &mut StdRng) -> Vec<u8> {
    let mut writer = GgufWriter::new();
    writer.add_metadata(
        "general.architecture",
        MetadataValue::String("llama".to_string()),
    );
    writer.add_metadata("llama.block_count", MetadataValue::Uint32(2));

    let embeddings = random_values(rng, 2 * 256);
    let packed = quantize(TensorType::Q4_K, &embeddings).expect("quantize embeddings");
    writer
        .add_tensor("token_embd.weight", vec![2, 256], TensorType::Q4_K, packed)
        .expect("add embeddings");

    let gate = random_values(rng, 128);
    let packed = quantize(TensorType::Q8_0, &gate).expect("quantize gate");
    writer
        .add_tensor("blk.0.ffn_gate.weight", vec![4, 32], TensorType::Q8_0, packed)
        .expect("add gate");

    writer
        .add_f32_tensor("output_norm.weight", vec![64], &random_values(rng, 64))
        .expect("add norm");

    writer.build().expect("build container")
}

#[test]
fn test_parse_convert_reparse_workflow() {
    let mut rng = StdRng::seed_from_u64(7);
    let bytes = build_model(&mut rng);

    let file = GgufFile::parse(bytes.as_slice()).expect("parse container");
    assert_eq!(file.version, 3);
    assert_eq!(file.tensors.len(), 3);
    assert_eq!(file.metadata_str("general.architecture"), Some("llama"));
    assert_eq!(file.metadata_u64("llama.block_count"), Some(2));

    let mut sink = MemorySink::new();
    let report = convert(
        &file,
        bytes.as_slice(),
        &mut sink,
        &ConvertOptions::default(),
    )
    .expect("convert");
    assert_eq!(report.tensor_count, 3);
    assert!(report.reduction_ratio() > 0.5);

    let output = OutputContainer::parse(sink.bytes().expect("committed")).expect("reparse output");
    assert_eq!(output.records.len(), 3);

    // re-encoded values stay close to a direct decode of the source
    let descriptor = file.tensor("blk.0.ffn_gate.weight").expect("descriptor");
    let direct = file
        .tensor_f32(bytes.as_slice(), descriptor)
        .expect("decode source");
    let converted = output
        .record("blk.0.ffn_gate.weight")
        .expect("record")
        .decode()
        .expect("decode output");
    assert_eq!(direct.len(), converted.len());
    for (a, b) in direct.iter().zip(converted.iter()) {
        assert!((a - b).abs() < 0.02, "{a} vs {b}");
    }
}

#[test]
fn test_int4_conversion_workflow() {
    let mut rng = StdRng::seed_from_u64(11);
    let bytes = build_model(&mut rng);
    let file = GgufFile::parse(bytes.as_slice()).expect("parse");

    let options = ConvertOptions {
        precision: TargetPrecision::Int4,
    };
    let mut sink = MemorySink::new();
    let report = convert(&file, bytes.as_slice(), &mut sink, &options).expect("convert");
    assert_eq!(report.precision, TargetPrecision::Int4);

    let output = OutputContainer::parse(sink.bytes().expect("committed")).expect("reparse");
    for record in &output.records {
        assert_eq!(record.precision, TargetPrecision::Int4);
        // 32 payload bytes plus one f32 scale per 64-element block
        assert_eq!(record.payload.len(), record.scales.len() * 32);
    }
}

#[test]
fn test_fused_matmul_on_parsed_tensor() {
    let mut rng = StdRng::seed_from_u64(13);
    let bytes = build_model(&mut rng);
    let file = GgufFile::parse(bytes.as_slice()).expect("parse");

    let descriptor = file.tensor("token_embd.weight").expect("descriptor");
    let payload = file
        .tensor_bytes(bytes.as_slice(), descriptor)
        .expect("payload");
    let weights = QuantizedTensor::new(
        descriptor.resolve_type().expect("type"),
        descriptor.dims.clone(),
        payload,
    )
    .expect("wrap");

    let activations = random_values(&mut rng, 256);
    let fused = matmul_quantized(&weights, &activations, 1).expect("fused");

    let dense = file
        .tensor_f32(bytes.as_slice(), descriptor)
        .expect("dense");
    for (r, got) in fused.iter().enumerate() {
        let mut sum = 0.0f32;
        for (i, a) in activations.iter().enumerate() {
            sum += dense[r * 256 + i] * a;
        }
        let tolerance = 1e-4 * sum.abs().max(1.0);
        assert!(
            (got - sum).abs() <= tolerance,
            "row {r}: fused {got} vs baseline {sum}"
        );
    }
}

#[test]
fn test_mmap_source_pipeline() {
    let mut rng = StdRng::seed_from_u64(17);
    let bytes = build_model(&mut rng);

    let dir = tempfile::tempdir().expect("tempdir");
    let model_path = dir.path().join("model.gguf");
    std::fs::write(&model_path, &bytes).expect("write model");

    let source = MmapSource::open(&model_path).expect("mmap");
    let file = GgufFile::parse(&source).expect("parse mapped");
    assert_eq!(file.tensors.len(), 3);

    // the mapped view and the in-memory buffer decode identically
    let in_memory = GgufFile::parse(bytes.as_slice()).expect("parse buffer");
    for descriptor in &file.tensors {
        let a = file.tensor_bytes(&source, descriptor).expect("mapped bytes");
        let b = in_memory
            .tensor_bytes(bytes.as_slice(), descriptor)
            .expect("buffer bytes");
        assert_eq!(a, b, "payload mismatch for {}", descriptor.name);
    }
}

#[test]
fn test_file_sink_pipeline() {
    let mut rng = StdRng::seed_from_u64(19);
    let bytes = build_model(&mut rng);
    let file = GgufFile::parse(bytes.as_slice()).expect("parse");

    let dir = tempfile::tempdir().expect("tempdir");
    let out_path = dir.path().join("model.cqtz");
    let mut sink = FileSink::new(&out_path);
    convert(
        &file,
        bytes.as_slice(),
        &mut sink,
        &ConvertOptions::default(),
    )
    .expect("convert");

    let written = std::fs::read(&out_path).expect("read output");
    let output = OutputContainer::parse(&written).expect("parse output");
    assert_eq!(output.records.len(), 3);

    // on-disk output matches the in-memory sink byte for byte
    let mut memory = MemorySink::new();
    convert(
        &file,
        bytes.as_slice(),
        &mut memory,
        &ConvertOptions::default(),
    )
    .expect("convert again");
    assert_eq!(written, memory.into_bytes().expect("committed"));
}

#[test]
fn test_duplicate_tensor_name_rejected_end_to_end() {
    let values = vec![0.5f32; 32];
    let mut writer = GgufWriter::new();
    writer
        .add_f32_tensor("w", vec![32], &values)
        .expect("first add");
    let err = writer.add_f32_tensor("w", vec![32], &values).unwrap_err();
    assert!(matches!(err, CuantizarError::FormatError { .. }));
}

#[test]
fn test_descriptor_shapes_survive_conversion() {
    let mut rng = StdRng::seed_from_u64(23);
    let bytes = build_model(&mut rng);
    let file = GgufFile::parse(bytes.as_slice()).expect("parse");

    let mut sink = MemorySink::new();
    convert(
        &file,
        bytes.as_slice(),
        &mut sink,
        &ConvertOptions::default(),
    )
    .expect("convert");
    let output = OutputContainer::parse(sink.bytes().expect("committed")).expect("reparse");

    for descriptor in &file.tensors {
        let record = output.record(&descriptor.name).expect("record");
        assert_eq!(record.dims, descriptor.dims, "{}", descriptor.name);
    }
}

#[test]
fn test_unsupported_types_fail_as_one_batch() {
    // forge a v3 container by hand: three tensors whose type tags do not
    // name any supported scheme, plus one good F32 tensor
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0x4655_4747u32.to_le_bytes()); // magic
    bytes.extend_from_slice(&3u32.to_le_bytes()); // version
    bytes.extend_from_slice(&4u64.to_le_bytes()); // tensor count
    bytes.extend_from_slice(&0u64.to_le_bytes()); // metadata count

    let descriptor = |out: &mut Vec<u8>, name: &str, tag: u32, offset: u64| {
        out.extend_from_slice(&(name.len() as u64).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&1u32.to_le_bytes()); // n_dims
        out.extend_from_slice(&4u64.to_le_bytes()); // dim 0
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
    };
    descriptor(&mut bytes, "good", 0, 0); // F32
    descriptor(&mut bytes, "bf16_tensor", 30, 0);
    descriptor(&mut bytes, "iq2_tensor", 16, 0);
    descriptor(&mut bytes, "future_tensor", 999, 0);

    while bytes.len() % 32 != 0 {
        bytes.push(0);
    }
    for v in [1.0f32, 2.0, 3.0, 4.0] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }

    let file = GgufFile::parse(bytes.as_slice()).expect("parse");
    assert_eq!(file.tensors.len(), 4);

    let mut sink = MemorySink::new();
    let err = convert(
        &file,
        bytes.as_slice(),
        &mut sink,
        &ConvertOptions::default(),
    )
    .unwrap_err();

    match err {
        CuantizarError::AggregateUnsupportedType { failures } => {
            assert_eq!(failures.len(), 3, "every unsupported tensor is reported");
            let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, ["bf16_tensor", "iq2_tensor", "future_tensor"]);
            assert_eq!(failures[0].type_tag, 30);
            assert_eq!(failures[2].type_tag, 999);
        }
        other => panic!("expected a batched failure, got {other:?}"),
    }
    assert!(sink.bytes().is_none(), "no output after a failed conversion");
}

#[test]
fn test_conversion_is_deterministic_across_runs() {
    let mut rng = StdRng::seed_from_u64(29);
    let bytes = build_model(&mut rng);
    let file = GgufFile::parse(bytes.as_slice()).expect("parse");

    let mut outputs: Vec<Vec<u8>> = Vec::new();
    for _ in 0..5 {
        let mut sink = MemorySink::new();
        convert(
            &file,
            bytes.as_slice(),
            &mut sink,
            &ConvertOptions::default(),
        )
        .expect("convert");
        outputs.push(sink.into_bytes().expect("committed"));
    }
    for window in outputs.windows(2) {
        assert_eq!(window[0], window[1], "byte-identical output on every run");
    }
}

#[test]
fn test_tensor_descriptor_from_parsed_file() {
    let mut rng = StdRng::seed_from_u64(31);
    let bytes = build_model(&mut rng);
    let file = GgufFile::parse(bytes.as_slice()).expect("parse");

    let descriptor: &TensorDescriptor = file.tensor("output_norm.weight").expect("descriptor");
    assert_eq!(descriptor.dims, vec![64]);
    assert_eq!(descriptor.resolve_type().expect("type"), TensorType::F32);
    assert_eq!(descriptor.element_count().expect("count"), 64);
    assert_eq!(descriptor.byte_size().expect("size"), 256);
}
