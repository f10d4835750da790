use crate::account::AddressDeriver;
use crate::config::LifecycleConfig;
use crate::crypto::{KeyPair, Pubkey};

pub fn handle_keygen(mnemonic: bool) {
    let keypair = if mnemonic {
        let phrase = match KeyPair::generate_mnemonic() {
            Ok(p) => p,
            Err(e) => {
                println!("Error: {}", e);
                return;
            }
        };
        match KeyPair::from_mnemonic(&phrase) {
            Ok(kp) => {
                println!("\n[SECRET MNEMONIC] - Write this down securely and NEVER share it:");
                println!("---------------------------------------------------------------");
                println!("{}", phrase);
                println!("---------------------------------------------------------------");
                kp
            }
            Err(e) => {
                println!("Error: {}", e);
                return;
            }
        }
    } else {
        KeyPair::generate()
    };

    println!("Public Key:  {}", keypair.public_key_hex());
    println!("Private Key: {} (KEEP SECRET!)", keypair.secret_hex());
}

pub fn handle_address(owner: &str, config_path: &str) {
    let owner: Pubkey = match owner.parse() {
        Ok(pk) => pk,
        Err(e) => {
            println!("Error: {}", e);
            return;
        }
    };
    let config = LifecycleConfig::load_or_default(config_path);
    let program_id = match config.protocol.program_id() {
        Ok(id) => id,
        Err(e) => {
            println!("Error: invalid program_id in {}: {}", config_path, e);
            return;
        }
    };
    let deriver = AddressDeriver::new(program_id, config.protocol.namespace_tag.clone());
    println!("Namespace: {}", deriver.namespace_tag());
    println!("Owner:     {}", owner);
    println!("Address:   {}", deriver.derive(&owner));
}
