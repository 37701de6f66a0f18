//! Basic usage example for msgframe frames and the envelope codec.

use bytes::BytesMut;
use msgframe_wire::{
    Envelope, EnvelopeDecoder, Frame, PropertiesBuilder, parse_properties,
    DEFAULT_MAX_FRAME_SIZE,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== msgframe Example ===\n");

    // 1. Frames and their metadata
    println!("1. Creating frames...");
    let mut greeting = Frame::from("Hello, msgframe!");
    greeting.set_more(true);
    greeting.set_group("demo")?;
    greeting.fprint(Some("   text:   "), &mut std::io::stdout())?;

    let binary = Frame::new(&[0x00, 0xff, 0x1a]);
    binary.fprint(Some("   binary: "), &mut std::io::stdout())?;
    println!("   hex: {}", binary.to_hex());

    let copy = greeting.duplicate();
    println!("   duplicate equal: {}", copy == greeting);

    // 2. Envelopes as they travel on a stream
    println!("\n2. Encoding envelopes...");
    let first = Envelope::data(greeting.into_bytes(), true).encode(DEFAULT_MAX_FRAME_SIZE)?;
    let second = Envelope::data(Frame::from("bye").into_bytes(), false)
        .encode(DEFAULT_MAX_FRAME_SIZE)?;
    println!("   Encoded sizes: {} and {} bytes", first.len(), second.len());

    let mut stream = BytesMut::new();
    stream.extend_from_slice(&first);
    stream.extend_from_slice(&second);

    // 3. Decode them back, part by part
    println!("\n3. Decoding...");
    let mut decoder = EnvelopeDecoder::new();
    while let Some(envelope) = decoder.decode(&mut stream)? {
        let frame = envelope.into_frame();
        frame.fprint(Some(if frame.more() { "   more: " } else { "   last: " }), &mut std::io::stdout())?;
    }

    // 4. Connection properties
    println!("\n4. HELLO properties...");
    let raw = PropertiesBuilder::new()
        .insert_str("Socket-Type", "PAIR")
        .build()?;
    for (key, value) in parse_properties(&raw)? {
        println!("   {}: {}", key, value);
    }

    Ok(())
}
