#[cfg(feature = "btleplug")]
#[test]
fn btleplug_radio_smoke() {
    if std::env::var("OPENXC_BLE_E2E").ok().as_deref() != Some("1") {
        eprintln!("set OPENXC_BLE_E2E=1 to run btleplug smoke test");
        return;
    }

    let (tx, _rx) = openxc_ble::radio_channel();
    let radio = openxc_ble::btleplug_backend::BtleplugRadio::spawn(
        tx,
        openxc_ble::btleplug_backend::BtleplugRadioConfig::default(),
    );

    assert!(
        radio.is_ok(),
        "btleplug radio should initialize when BLE is available"
    );
}

#[cfg(not(feature = "btleplug"))]
#[test]
fn btleplug_radio_smoke() {
    eprintln!("enable feature openxc-ble/btleplug to run this test");
}
