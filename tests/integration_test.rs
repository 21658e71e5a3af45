// ============================================================================
// tests/integration_test.rs - ドライバ統合テスト
// ============================================================================
//!
//! シミュレートしたカードに対して、起動からストリーミング、電源遷移、
//! 終了までを通しで動かす。

use adlib_gold::io::audio::format::DataRange;
use adlib_gold::io::audio::persist::MemoryStore;
use adlib_gold::io::audio::regs::*;
use adlib_gold::io::audio::wave::{Direction, KsState, RunState};
use adlib_gold::io::audio::InterruptOutcome;
use adlib_gold::sim::{SimCard, SimDma};
use adlib_gold::{install_adapter, AudioError, DevicePowerState, ResourceList, Subdevices};

fn resources() -> ResourceList {
    ResourceList::new(DEFAULT_IO_BASE, 7, 1)
}

/// Raise PCM requests until the engine has moved `bytes` through the FIFO.
fn pump_pcm(card: &SimCard, devices: &Subdevices<'_, SimCard>, bytes: usize) {
    let wave = devices.wave.as_ref().unwrap();
    let mut moved = 0;
    while moved < bytes {
        card.raise_pcm_request();
        assert_eq!(devices.adapter().service_interrupt(), InterruptOutcome::Handled);
        moved += wave.service();
    }
}

#[test]
fn mixer_settings_survive_a_restart() {
    let store = MemoryStore::new();

    let card = SimCard::new();
    let adapter =
        install_adapter(card.clone(), &resources(), Some(Box::new(store.clone()))).unwrap();
    adapter.write_control(CTRL_SAMP_VOL_LEFT, 0x42);
    adapter.write_control(CTRL_BASS, 0xF3);
    drop(adapter);

    let fresh = SimCard::new();
    let adapter =
        install_adapter(fresh.clone(), &resources(), Some(Box::new(store.clone()))).unwrap();
    assert_eq!(adapter.read_control(CTRL_SAMP_VOL_LEFT), 0x42);
    assert_eq!(fresh.control_register(CTRL_SAMP_VOL_LEFT), 0x42);
    assert_eq!(fresh.control_register(CTRL_BASS), 0xF3);
}

#[test]
fn negotiated_16bit_render_streams_through_the_fifo() {
    let card = SimCard::new();
    let adapter = install_adapter(card.clone(), &resources(), None).unwrap();
    let devices = Subdevices::start(&adapter, &resources(), Some(Box::new(SimDma::new(0x4000))));
    let wave = devices.wave.as_ref().unwrap();

    let format = wave
        .data_range_intersection(&DataRange::pcm(2, (8, 16), (8000, 48000)))
        .unwrap();
    assert_eq!((format.samples_per_sec, format.bits_per_sample, format.channels), (44100, 16, 2));

    wave.with_buffer(|buffer| {
        for chunk in buffer.chunks_exact_mut(2) {
            chunk.copy_from_slice(&0x1000i16.to_le_bytes());
        }
    });
    let stream = wave.new_stream(Direction::Render, format).unwrap();
    stream.set_state(KsState::Run).unwrap();
    pump_pcm(&card, &devices, 1024);

    let out = card.take_pcm_out();
    assert_eq!(out.len(), 128 + 1024);
    for sample in out.chunks_exact(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]);
        assert_eq!(value & 0x0F, 0);
        assert!((0x0FE0..=0x1020).contains(&value), "{value:#x}");
    }

    stream.set_state(KsState::Stop).unwrap();
    assert_eq!(stream.run_state(), RunState::Stopped);
    assert_eq!(stream.position(), 0);
}

#[test]
fn full_duplex_wave_with_midi_traffic() {
    let card = SimCard::new();
    let adapter = install_adapter(card.clone(), &resources(), None).unwrap();
    let devices = Subdevices::start(&adapter, &resources(), Some(Box::new(SimDma::new(0x4000))));
    let wave = devices.wave.as_ref().unwrap();
    let midi = devices.midi.as_ref().unwrap();

    let render = wave
        .new_stream(Direction::Render, adlib_gold::io::audio::WaveFormat::pcm(2, 22050, 8))
        .unwrap();
    let pinned = wave
        .data_range_intersection(&DataRange::pcm(1, (8, 16), (7000, 48000)))
        .unwrap();
    assert_eq!(pinned.samples_per_sec, 22050);
    let capture = wave.new_stream(Direction::Capture, pinned).unwrap();

    let midi_in = midi.new_stream(true).unwrap();
    midi_in.set_state(KsState::Run);

    render.set_state(KsState::Run).unwrap();
    capture.set_state(KsState::Run).unwrap();

    card.push_pcm_in(&[0x55; 128]);
    card.push_midi_rx(&[0x90, 0x3C, 0x64]);
    card.raise_pcm_request();
    while card.interrupt_asserted() {
        assert_eq!(adapter.service_interrupt(), InterruptOutcome::Handled);
    }
    devices.service();

    wave.with_buffer(|buffer| assert!(buffer[..128].iter().all(|b| *b == 0x55)));
    let mut bytes = [0u8; 8];
    assert_eq!(midi_in.read(&mut bytes), Ok(3));
    assert_eq!(&bytes[..3], &[0x90, 0x3C, 0x64]);
}

#[test]
fn powered_down_device_keeps_cache_and_refuses_hardware() {
    let card = SimCard::new();
    let adapter = install_adapter(card.clone(), &resources(), None).unwrap();
    let devices = Subdevices::start(&adapter, &resources(), None);
    let midi = devices.midi.as_ref().unwrap();
    let mut midi_out = midi.new_stream(false).unwrap();

    devices.set_power_state(DevicePowerState::Off);
    adapter.write_control(CTRL_MASTER_VOL_LEFT, 0x11);
    assert_eq!(adapter.read_control(CTRL_MASTER_VOL_LEFT), 0x11);
    assert_eq!(adapter.save_to_eeprom(), Err(AudioError::PoweredOff));
    assert_eq!(midi_out.write(&[0xFE]), Ok(0));
    assert_ne!(card.control_register(CTRL_MASTER_VOL_LEFT), 0x11);

    devices.set_power_state(DevicePowerState::FullPower);
    assert_eq!(card.control_register(CTRL_MASTER_VOL_LEFT), 0x11);
    assert_eq!(midi_out.write(&[0xFE]), Ok(1));
    assert_eq!(card.take_midi_tx(), [0xFE]);
}

#[test]
fn shared_line_reports_foreign_interrupts() {
    let card = SimCard::new();
    let adapter = install_adapter(card.clone(), &resources(), None).unwrap();
    let _devices = Subdevices::start(&adapter, &resources(), Some(Box::new(SimDma::new(0x4000))));

    assert_eq!(adapter.service_interrupt(), InterruptOutcome::NotHandled);
    assert_eq!(card.selected_bank(), Bank::Fm1);
}

#[test]
fn teardown_releases_the_card() {
    let card = SimCard::new();
    let adapter = install_adapter(card.clone(), &resources(), None).unwrap();
    {
        let devices =
            Subdevices::start(&adapter, &resources(), Some(Box::new(SimDma::new(0x4000))));
        let wave = devices.wave.as_ref().unwrap();
        let stream = wave
            .new_stream(Direction::Render, adlib_gold::io::audio::WaveFormat::pcm(1, 11025, 8))
            .unwrap();
        stream.set_state(KsState::Run).unwrap();
    }

    assert_eq!(card.mma_register(MMA_MIDI_CONTROL), MidiControl::MASK_ALL.bits());
    assert_eq!(card.mma_register(MMA_FORMAT), FormatControl::stopped().encode());

    card.push_midi_rx(&[0xF8]);
    card.raise_pcm_request();
    assert_eq!(adapter.service_interrupt(), InterruptOutcome::Handled);
    assert_eq!(card.midi_rx_len(), 1);
}
