use log::{info, warn};

use crate::catalog::Catalog;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Button {
    Up,
    Down,
    Select,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PanelMode {
    Normal,
    PickSlot0,
    PickSlot1,
    Confirm,
}

/// Operator selection flow: *normal → pick slot 0 → pick slot 1 →
/// confirm → apply*, with confirm-no returning to pick-slot-0.
///
/// The panel never touches the FDC; it observes the catalog and applies
/// its choices through bind/eject/save. Scroll position `-1` means NONE
/// and is offered for slot 1 only.
pub struct Panel {
    mode: PanelMode,
    scroll: i32,
    pick0: i32,
    pick1: i32,
    confirm_yes: bool,
}

impl Panel {
    pub fn new() -> Panel {
        Panel {
            mode: PanelMode::Normal,
            scroll: 0,
            pick0: 0,
            pick1: -1,
            confirm_yes: true,
        }
    }

    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    pub fn press(&mut self, button: Button, catalog: &mut Catalog) {
        let count = catalog.image_count() as i32;
        match (self.mode, button) {
            (PanelMode::Normal, Button::Select) => {
                if count == 0 {
                    info!("no images on the medium, nothing to select");
                    return;
                }
                self.scroll = catalog.loaded_index(0).map(|i| i as i32).unwrap_or(0);
                self.mode = PanelMode::PickSlot0;
            }
            (PanelMode::Normal, _) => {}

            (PanelMode::PickSlot0, Button::Up) => {
                self.scroll -= 1;
                if self.scroll < 0 {
                    self.scroll = count - 1;
                }
            }
            (PanelMode::PickSlot0, Button::Down) => {
                self.scroll += 1;
                if self.scroll >= count {
                    self.scroll = 0;
                }
            }
            (PanelMode::PickSlot0, Button::Select) => {
                self.pick0 = self.scroll;
                self.scroll = catalog.loaded_index(1).map(|i| i as i32).unwrap_or(-1);
                self.mode = PanelMode::PickSlot1;
            }

            (PanelMode::PickSlot1, Button::Up) => {
                self.scroll -= 1;
                if self.scroll < -1 {
                    self.scroll = count - 1;
                }
            }
            (PanelMode::PickSlot1, Button::Down) => {
                self.scroll += 1;
                if self.scroll >= count {
                    self.scroll = -1;
                }
            }
            (PanelMode::PickSlot1, Button::Select) => {
                self.pick1 = self.scroll;
                self.confirm_yes = true;
                self.mode = PanelMode::Confirm;
            }

            (PanelMode::Confirm, Button::Up) | (PanelMode::Confirm, Button::Down) => {
                self.confirm_yes = !self.confirm_yes;
            }
            (PanelMode::Confirm, Button::Select) => {
                if self.confirm_yes {
                    self.apply(catalog);
                    self.mode = PanelMode::Normal;
                } else {
                    // Cancel path: back to picking slot 0.
                    self.scroll = self.pick0;
                    self.mode = PanelMode::PickSlot0;
                }
            }
        }
    }

    fn apply(&mut self, catalog: &mut Catalog) {
        if let Err(err) = catalog.load(0, self.pick0 as usize) {
            warn!("drive 0: {}", err);
        }
        if self.pick1 < 0 {
            catalog.eject(1);
        } else if let Err(err) = catalog.load(1, self.pick1 as usize) {
            warn!("drive 1: {}", err);
        }
        if let Err(err) = catalog.save_bindings() {
            warn!("could not persist bindings: {}", err);
        }
    }

    /// Display contents for the current mode. `current_track` is the FDC
    /// head position, shown on the normal screen.
    pub fn render(&self, catalog: &Catalog, current_track: u8) -> Vec<String> {
        let slot_line = |slot: usize| match catalog.binding(slot) {
            Some(binding) => format!("{}: {}", slot, binding.disk.name),
            None => format!("{}: (empty)", slot),
        };
        let scroll_name = |scroll: i32| {
            if scroll < 0 {
                "NONE".to_string()
            } else {
                catalog
                    .image_name(scroll as usize)
                    .unwrap_or("?")
                    .to_string()
            }
        };
        match self.mode {
            PanelMode::Normal => vec![
                "WD1770 Emulator".to_string(),
                slot_line(0),
                slot_line(1),
                format!("track {}", current_track),
            ],
            PanelMode::PickSlot0 => {
                vec!["Drive 0:".to_string(), format!("> {}", scroll_name(self.scroll))]
            }
            PanelMode::PickSlot1 => {
                vec!["Drive 1:".to_string(), format!("> {}", scroll_name(self.scroll))]
            }
            PanelMode::Confirm => vec![
                format!("0: {}", scroll_name(self.pick0)),
                format!("1: {}", scroll_name(self.pick1)),
                if self.confirm_yes { "> Apply".to_string() } else { "> Cancel".to_string() },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemStorage, Storage};

    fn three_image_catalog() -> Catalog {
        let mut storage = MemStorage::new();
        storage.insert("A.IMG", vec![0u8; 163_840]);
        storage.insert("B.IMG", vec![0u8; 327_680]);
        storage.insert("C.IMG", vec![0u8; 737_280]);
        let mut catalog = Catalog::new(Box::new(storage));
        catalog.scan().unwrap();
        catalog
    }

    #[test]
    fn full_selection_flow_binds_and_persists() {
        let mut catalog = three_image_catalog();
        let mut panel = Panel::new();

        panel.press(Button::Select, &mut catalog); // -> pick slot 0
        panel.press(Button::Down, &mut catalog); // B.IMG
        panel.press(Button::Select, &mut catalog); // -> pick slot 1
        panel.press(Button::Select, &mut catalog); // NONE -> confirm
        assert_eq!(panel.mode(), PanelMode::Confirm);
        panel.press(Button::Select, &mut catalog); // apply

        assert_eq!(panel.mode(), PanelMode::Normal);
        assert_eq!(catalog.binding(0).unwrap().disk.name, "B.IMG");
        assert!(catalog.binding(1).is_none());
        let record = catalog.storage_mut().load("lastimg.cfg").unwrap();
        assert_eq!(record, b"B.IMG,NONE\n");
    }

    #[test]
    fn cancel_returns_to_slot_zero_without_binding() {
        let mut catalog = three_image_catalog();
        let mut panel = Panel::new();

        panel.press(Button::Select, &mut catalog);
        panel.press(Button::Select, &mut catalog);
        panel.press(Button::Select, &mut catalog);
        panel.press(Button::Up, &mut catalog); // toggle to Cancel
        panel.press(Button::Select, &mut catalog);

        assert_eq!(panel.mode(), PanelMode::PickSlot0);
        assert!(catalog.binding(0).is_none());
        assert!(catalog.storage_mut().load("lastimg.cfg").is_err());
    }

    #[test]
    fn scrolling_wraps_and_offers_none_for_slot_one() {
        let mut catalog = three_image_catalog();
        let mut panel = Panel::new();

        panel.press(Button::Select, &mut catalog);
        panel.press(Button::Up, &mut catalog); // wraps to last image
        assert_eq!(panel.render(&catalog, 0)[1], "> C.IMG");

        panel.press(Button::Select, &mut catalog); // slot 1, starts at NONE
        assert_eq!(panel.render(&catalog, 0)[1], "> NONE");
        panel.press(Button::Down, &mut catalog);
        assert_eq!(panel.render(&catalog, 0)[1], "> A.IMG");
        panel.press(Button::Up, &mut catalog);
        panel.press(Button::Up, &mut catalog); // below NONE wraps to last
        assert_eq!(panel.render(&catalog, 0)[1], "> C.IMG");
    }

    #[test]
    fn select_does_nothing_with_an_empty_catalog() {
        let mut storage = MemStorage::new();
        storage.insert("README.TXT", vec![0u8; 4]);
        let mut catalog = Catalog::new(Box::new(storage));
        catalog.scan().unwrap();

        let mut panel = Panel::new();
        panel.press(Button::Select, &mut catalog);
        assert_eq!(panel.mode(), PanelMode::Normal);
    }

    #[test]
    fn picking_starts_from_the_bound_image() {
        let mut catalog = three_image_catalog();
        catalog.load(0, 2).unwrap();
        let mut panel = Panel::new();

        panel.press(Button::Select, &mut catalog);
        assert_eq!(panel.render(&catalog, 0)[1], "> C.IMG");
    }
}
