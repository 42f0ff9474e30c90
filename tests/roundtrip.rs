use pretty_assertions::assert_eq;
use webpanim::codec::encode_vp8l;
use webpanim::container;
use webpanim::{AnimError,AnimResult,AnimationDecoder,AnimationEncoder,AnimationOptions,
        FrameCodec,FrameConfig,FramePayload,Metadata,PayloadRef,PixelLayout,RawImage,
        Vp8lStoreCodec};

/// Deterministic RGBA noise.
fn noise(w: u32, h: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..(4 * w * h))
        .map(|_| {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            (state >> 16) as u8
        })
        .collect()
}

fn solid(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat((w * h) as usize)
}

/// Records the configs it was handed.
#[derive(Default)]
struct RecordingCodec {
    inner: Vp8lStoreCodec,
    qualities: Vec<f32>,
    decompressed: usize,
}

impl FrameCodec for RecordingCodec {
    fn compress(&mut self, rgba: &[u8], w: u32, h: u32, config: &FrameConfig)
            -> AnimResult<FramePayload> {
        self.qualities.push(config.quality);
        self.inner.compress(rgba, w, h, config)
    }

    fn decompress(&mut self, payload: PayloadRef, w: u32, h: u32)
            -> AnimResult<Vec<u8>> {
        self.decompressed += 1;
        self.inner.decompress(payload, w, h)
    }
}

#[test]
fn test_red_blue_scenario() {
    let config = FrameConfig::lossless();
    let red = solid(4, 4, [255, 0, 0, 255]);
    let blue = solid(4, 4, [0, 0, 255, 255]);

    let mut encoder = AnimationEncoder::new(4, 4, AnimationOptions::default()).expect("new");
    encoder.add_rgba(Some(&red), 0, &config).expect("add");
    encoder.add_rgba(Some(&blue), 100, &config).expect("add");
    let data = encoder.finalize().expect("finalize");

    let anim = webpanim::decode(&data).expect("decode");
    assert_eq!((anim.width, anim.height), (4, 4));
    assert_eq!(anim.loop_count, 0);
    assert_eq!(anim.frame_count, 2);
    let timestamps: Vec<u32> = anim.frames.iter().map(|f| f.timestamp).collect();
    assert_eq!(timestamps, vec![0, 100]);
    assert_eq!(anim.frames[0].pixels, red);
    assert_eq!(anim.frames[1].pixels, blue);
}

#[test]
fn test_lossless_roundtrip() {
    let (w, h) = (7, 5);
    let timestamps = [0, 40, 95, 200, 201];
    let frames: Vec<Vec<u8>> = (0..timestamps.len() as u32).map(|i| noise(w, h, i)).collect();

    let options = AnimationOptions {
        loop_count: 3,
        ..AnimationOptions::default()
    };
    let mut encoder = AnimationEncoder::new(w, h, options).expect("new");
    for (frame, &ts) in frames.iter().zip(timestamps.iter()) {
        encoder.add_rgba(Some(frame), ts, &FrameConfig::lossless()).expect("add");
    }
    let data = encoder.finalize().expect("finalize");

    let anim = webpanim::decode(&data).expect("decode");
    assert_eq!(anim.loop_count, 3);
    assert_eq!(anim.frame_count, frames.len());
    for (i, decoded) in anim.frames.iter().enumerate() {
        assert_eq!(decoded.timestamp, timestamps[i]);
        assert_eq!(decoded.pixels, frames[i], "frame {}", i);
    }
}

#[test]
fn test_minimized_roundtrip() {
    let (w, h) = (6, 6);
    let first = noise(w, h, 1);
    let mut second = first.clone();
    // Change a 2x1 strip at (3, 4), including alpha.
    for x in 3..5 {
        let i = 4 * (4 * w as usize + x);
        second[i..(i + 4)].copy_from_slice(&[1, 2, 3, 4]);
    }

    let options = AnimationOptions {
        minimize_size: true,
        ..AnimationOptions::default()
    };
    let mut encoder = AnimationEncoder::new(w, h, options).expect("new");
    encoder.add_rgba(Some(&first), 0, &FrameConfig::lossless()).expect("add");
    encoder.add_rgba(Some(&second), 50, &FrameConfig::lossless()).expect("add");
    encoder.add_rgba(Some(&second), 90, &FrameConfig::lossless()).expect("add");
    let data = encoder.finalize().expect("finalize");

    let parsed = container::parse(&data).expect("parse");
    assert!(parsed.frames[1].rect.num_pixels() < (w * h) as usize);

    let anim = webpanim::decode(&data).expect("decode");
    assert_eq!(anim.frames[0].pixels, first);
    assert_eq!(anim.frames[1].pixels, second);
    assert_eq!(anim.frames[2].pixels, second);
}

#[test]
fn test_codec_sees_each_config() {
    let mut encoder = AnimationEncoder::with_codec(
            2, 2, AnimationOptions::default(), RecordingCodec::default()).expect("new");
    let frame = solid(2, 2, [8, 8, 8, 255]);
    encoder.add_rgba(Some(&frame), 0, &FrameConfig::default().with_quality(10.0)).expect("add");
    encoder.add_rgba(None, 10, &FrameConfig::default()).expect("repeat");
    encoder.add_rgba(Some(&frame), 20, &FrameConfig::default().with_quality(90.0)).expect("add");
    assert_eq!(encoder.codec().qualities, vec![10.0, 90.0]);
    let data = encoder.finalize().expect("finalize");

    let mut decoder = AnimationDecoder::with_codec(&data[..], RecordingCodec::default())
        .expect("new");
    let info = decoder.get_info().expect("info");
    assert_eq!(info.frame_count, 3);
    assert_eq!(decoder.codec_mut().decompressed, 0);

    let anim = decoder.decode_all().expect("decode");
    assert_eq!(decoder.codec_mut().decompressed, 3);
    assert_eq!(anim.frames[1].pixels, frame);
    decoder.release();
}

#[test]
fn test_imported_frames() {
    let bgr = [
        0, 0, 255,  0, 255, 0,
        255, 0, 0,  0, 0, 0 ];
    let image = RawImage::new(&bgr, 2, 2, PixelLayout::Bgr8).expect("image");

    let mut encoder = AnimationEncoder::new(2, 2, AnimationOptions::default()).expect("new");
    encoder.add_frame(Some(&image), 0, &FrameConfig::lossless()).expect("add");
    let data = encoder.finalize().expect("finalize");

    let anim = webpanim::decode(&data).expect("decode");
    let expected = [
        255, 0, 0, 255,  0, 255, 0, 255,
        0, 0, 255, 255,  0, 0, 0, 255 ];
    assert_eq!(anim.frames[0].pixels, &expected[..]);
}

#[test]
fn test_loop_count_rewrite() {
    let mut encoder = AnimationEncoder::new(3, 3, AnimationOptions::default()).expect("new");
    encoder.add_rgba(Some(&noise(3, 3, 5)), 0, &FrameConfig::lossless()).expect("add");
    encoder.add_rgba(Some(&noise(3, 3, 6)), 30, &FrameConfig::lossless()).expect("add");
    let data = encoder.finalize().expect("finalize");

    let patched = webpanim::rewrite_loop_count(&data, 9).expect("rewrite");
    let before = container::parse(&data).expect("parse");
    let after = container::parse(&patched).expect("parse");
    assert_eq!(before.params.loop_count, 0);
    assert_eq!(after.params.loop_count, 9);
    for (a, b) in before.frames.iter().zip(after.frames.iter()) {
        assert_eq!(a.payload(&data), b.payload(&patched));
    }

    assert_eq!(webpanim::decode(&patched).expect("decode").frames,
            webpanim::decode(&data).expect("decode").frames);
}

#[test]
fn test_metadata_preserved() {
    let metadata = Metadata {
        icc: None,
        exif: Some(b"Exif\0\0MM".to_vec()),
        xmp: Some(b"<x:xmpmeta/>".to_vec()),
    };
    let mut encoder = AnimationEncoder::new(2, 2, AnimationOptions::default()).expect("new");
    encoder.set_metadata(metadata.clone());
    encoder.add_rgba(Some(&solid(2, 2, [0; 4])), 0, &FrameConfig::lossless()).expect("add");
    let data = encoder.finalize().expect("finalize");

    let mut decoder = AnimationDecoder::new(&data[..]).expect("new");
    assert_eq!(decoder.metadata().expect("metadata"), metadata);
    decoder.release();
}

#[test]
fn test_malformed_input() {
    let mut encoder = AnimationEncoder::new(2, 2, AnimationOptions::default()).expect("new");
    encoder.add_rgba(Some(&noise(2, 2, 3)), 0, &FrameConfig::lossless()).expect("add");
    let data = encoder.finalize().expect("finalize");

    for len in 0..data.len() {
        match webpanim::decode(&data[..len]) {
            Err(AnimError::MalformedContainer(_)) => (),
            other => panic!("length {}: unexpected {:?}", len, other),
        }
    }

    let mut bad = data.clone();
    bad[8..12].copy_from_slice(b"WEBQ");
    match webpanim::decode(&bad) {
        Err(ref e @ AnimError::MalformedContainer(_)) => assert!(!e.is_input_error()),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_corrupt_payload() {
    let payload = encode_vp8l(&solid(2, 2, [1, 2, 3, 4]), 2, 2).expect("encode");
    let mut encoder = AnimationEncoder::new(2, 2, AnimationOptions::default()).expect("new");
    encoder.add_rgba(Some(&solid(2, 2, [1, 2, 3, 4])), 0, &FrameConfig::lossless()).expect("add");
    let mut data = encoder.finalize().expect("finalize");

    // Flip the VP8L signature inside the frame.
    let parsed = container::parse(&data).expect("parse");
    let start = parsed.frames[0].bitstream.start;
    assert_eq!(&data[parsed.frames[0].bitstream.clone()], &payload[..]);
    data[start] = 0;

    match webpanim::decode(&data) {
        Err(AnimError::DecodeFailed(_)) => (),
        other => panic!("unexpected {:?}", other),
    }
}
