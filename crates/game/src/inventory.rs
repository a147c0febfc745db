use std::collections::BTreeMap;

use engine::{DefDatabase, EquipSlot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const INVENTORY_SLOTS: usize = 28;
pub const DEFAULT_BANK_CAPACITY: usize = 48;
pub const MAX_BANK_CAPACITY: usize = 400;
pub const MAX_GOLD: u64 = 2_147_483_647;
/// Vendors buy back at this share of an item's value, rounded down.
pub const SELL_RATIO_PERCENT: u64 = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    pub qty: u32,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, qty: u32) -> Self {
        Self {
            item: item.into(),
            qty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("unknown item '{item}'")]
    UnknownItem { item: String },
    #[error("not enough space for {qty} x {item}")]
    Full { item: String, qty: u32 },
    #[error("not enough {item}: have {have}, need {need}")]
    NotEnough { item: String, have: u32, need: u32 },
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    #[error("'{item}' cannot be equipped")]
    NotEquippable { item: String },
    #[error("nothing equipped in {slot}")]
    SlotEmpty { slot: &'static str },
    #[error("not enough gold: have {have}, need {need}")]
    NotEnoughGold { have: u64, need: u64 },
    #[error("bank is full ({capacity} slots)")]
    BankFull { capacity: usize },
}

/// Fixed 28-slot backpack. Stackable items share one slot; everything else takes one slot
/// per unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    slots: Vec<Option<ItemStack>>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    pub fn new() -> Self {
        Self {
            slots: vec![None; INVENTORY_SLOTS],
        }
    }

    pub fn slots(&self) -> &[Option<ItemStack>] {
        &self.slots
    }

    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub fn count(&self, item: &str) -> u32 {
        self.slots
            .iter()
            .flatten()
            .filter(|stack| stack.item == item)
            .fold(0u32, |total, stack| total.saturating_add(stack.qty))
    }

    pub fn contains(&self, item: &str) -> bool {
        self.count(item) > 0
    }

    pub fn can_add(&self, db: &DefDatabase, item: &str, qty: u32) -> bool {
        if qty == 0 {
            return true;
        }
        if db.is_stackable(item) {
            self.stack_slot(item).is_some() || self.free_slots() >= 1
        } else {
            self.free_slots() >= qty as usize
        }
    }

    /// All-or-nothing insert.
    pub fn add(&mut self, db: &DefDatabase, item: &str, qty: u32) -> Result<(), InventoryError> {
        if qty == 0 {
            return Err(InventoryError::ZeroQuantity);
        }
        if db.item(item).is_none() {
            return Err(InventoryError::UnknownItem {
                item: item.to_string(),
            });
        }
        if !self.can_add(db, item, qty) {
            return Err(InventoryError::Full {
                item: item.to_string(),
                qty,
            });
        }

        if db.is_stackable(item) {
            if let Some(index) = self.stack_slot(item) {
                if let Some(stack) = self.slots[index].as_mut() {
                    stack.qty = stack.qty.saturating_add(qty);
                }
            } else if let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) {
                *slot = Some(ItemStack::new(item, qty));
            }
            return Ok(());
        }

        let mut remaining = qty;
        for slot in self.slots.iter_mut().filter(|slot| slot.is_none()) {
            if remaining == 0 {
                break;
            }
            *slot = Some(ItemStack::new(item, 1));
            remaining -= 1;
        }
        Ok(())
    }

    /// All-or-nothing removal, taking from the last matching slots first.
    pub fn remove(&mut self, item: &str, qty: u32) -> Result<(), InventoryError> {
        if qty == 0 {
            return Err(InventoryError::ZeroQuantity);
        }
        let have = self.count(item);
        if have < qty {
            return Err(InventoryError::NotEnough {
                item: item.to_string(),
                have,
                need: qty,
            });
        }
        let mut remaining = qty;
        for slot in self.slots.iter_mut().rev() {
            if remaining == 0 {
                break;
            }
            let Some(stack) = slot.as_mut() else {
                continue;
            };
            if stack.item != item {
                continue;
            }
            let taken = stack.qty.min(remaining);
            stack.qty -= taken;
            remaining -= taken;
            if stack.qty == 0 {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Writes a stack into a specific slot; used when restoring saves.
    pub(crate) fn put_slot(&mut self, index: usize, stack: ItemStack) -> bool {
        match self.slots.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(stack);
                true
            }
            _ => false,
        }
    }

    fn stack_slot(&self, item: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|stack| stack.item == item))
    }
}

/// Bank storage: every item stacks, one slot per distinct item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bank {
    capacity: usize,
    stacks: Vec<ItemStack>,
}

impl Default for Bank {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BANK_CAPACITY)
    }
}

impl Bank {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(1, MAX_BANK_CAPACITY),
            stacks: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stacks(&self) -> &[ItemStack] {
        &self.stacks
    }

    pub fn count(&self, item: &str) -> u32 {
        self.stacks
            .iter()
            .find(|stack| stack.item == item)
            .map(|stack| stack.qty)
            .unwrap_or(0)
    }

    pub fn store(&mut self, item: &str, qty: u32) -> Result<(), InventoryError> {
        if qty == 0 {
            return Err(InventoryError::ZeroQuantity);
        }
        if let Some(stack) = self.stacks.iter_mut().find(|stack| stack.item == item) {
            stack.qty = stack.qty.saturating_add(qty);
            return Ok(());
        }
        if self.stacks.len() >= self.capacity {
            return Err(InventoryError::BankFull {
                capacity: self.capacity,
            });
        }
        self.stacks.push(ItemStack::new(item, qty));
        Ok(())
    }

    pub fn take(&mut self, item: &str, qty: u32) -> Result<(), InventoryError> {
        if qty == 0 {
            return Err(InventoryError::ZeroQuantity);
        }
        let have = self.count(item);
        if have < qty {
            return Err(InventoryError::NotEnough {
                item: item.to_string(),
                have,
                need: qty,
            });
        }
        if let Some(index) = self.stacks.iter().position(|stack| stack.item == item) {
            self.stacks[index].qty -= qty;
            if self.stacks[index].qty == 0 {
                self.stacks.remove(index);
            }
        }
        Ok(())
    }
}

/// Moves `qty` from the inventory into the bank, all-or-nothing.
pub fn deposit(
    inventory: &mut Inventory,
    bank: &mut Bank,
    item: &str,
    qty: u32,
) -> Result<(), InventoryError> {
    let have = inventory.count(item);
    if have < qty {
        return Err(InventoryError::NotEnough {
            item: item.to_string(),
            have,
            need: qty,
        });
    }
    bank.store(item, qty)?;
    inventory.remove(item, qty)
}

pub fn withdraw(
    db: &DefDatabase,
    inventory: &mut Inventory,
    bank: &mut Bank,
    item: &str,
    qty: u32,
) -> Result<(), InventoryError> {
    let have = bank.count(item);
    if have < qty {
        return Err(InventoryError::NotEnough {
            item: item.to_string(),
            have,
            need: qty,
        });
    }
    inventory.add(db, item, qty)?;
    bank.take(item, qty)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Equipment {
    slots: BTreeMap<EquipSlot, String>,
}

impl Equipment {
    pub fn get(&self, slot: EquipSlot) -> Option<&str> {
        self.slots.get(&slot).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EquipSlot, &str)> {
        self.slots.iter().map(|(slot, item)| (*slot, item.as_str()))
    }

    pub(crate) fn set(&mut self, slot: EquipSlot, item: impl Into<String>) -> Option<String> {
        self.slots.insert(slot, item.into())
    }

    pub(crate) fn clear(&mut self, slot: EquipSlot) -> Option<String> {
        self.slots.remove(&slot)
    }

    pub fn accuracy_bonus(&self, db: &DefDatabase) -> i32 {
        self.sum(db, |def| def.accuracy_bonus)
    }

    pub fn strength_bonus(&self, db: &DefDatabase) -> i32 {
        self.sum(db, |def| def.strength_bonus)
    }

    pub fn defence_bonus(&self, db: &DefDatabase) -> i32 {
        self.sum(db, |def| def.defence_bonus)
    }

    pub fn damage_reduction(&self, db: &DefDatabase) -> u32 {
        self.slots
            .values()
            .filter_map(|item| db.item(item))
            .map(|def| def.damage_reduction)
            .sum()
    }

    fn sum(&self, db: &DefDatabase, field: impl Fn(&engine::ItemDef) -> i32) -> i32 {
        self.slots
            .values()
            .filter_map(|item| db.item(item))
            .map(field)
            .sum()
    }
}

/// Equips an inventory item into its def slot, swapping any current item back.
pub fn equip(
    db: &DefDatabase,
    inventory: &mut Inventory,
    equipment: &mut Equipment,
    quiver: &mut Quiver,
    item: &str,
) -> Result<(), InventoryError> {
    let def = db.item(item).ok_or_else(|| InventoryError::UnknownItem {
        item: item.to_string(),
    })?;
    if def.ammo {
        let qty = inventory.count(item);
        if qty == 0 {
            return Err(InventoryError::NotEnough {
                item: item.to_string(),
                have: 0,
                need: 1,
            });
        }
        if let Some(previous) = quiver.stack.as_ref().filter(|stack| stack.item != item) {
            if !inventory.can_add(db, &previous.item, previous.qty) {
                return Err(InventoryError::Full {
                    item: previous.item.clone(),
                    qty: previous.qty,
                });
            }
        }
        inventory.remove(item, qty)?;
        if let Some(previous) = quiver.stack.take() {
            if previous.item == item {
                quiver.stack = Some(ItemStack::new(item, previous.qty.saturating_add(qty)));
                return Ok(());
            }
            inventory.add(db, &previous.item, previous.qty)?;
        }
        quiver.stack = Some(ItemStack::new(item, qty));
        return Ok(());
    }

    let slot = def.equip_slot.ok_or_else(|| InventoryError::NotEquippable {
        item: item.to_string(),
    })?;
    inventory.remove(item, 1)?;
    if let Some(previous) = equipment.set(slot, item) {
        // The freed slot always fits a single unequipped item.
        inventory.add(db, &previous, 1)?;
    }
    Ok(())
}

pub fn unequip(
    db: &DefDatabase,
    inventory: &mut Inventory,
    equipment: &mut Equipment,
    slot: EquipSlot,
) -> Result<(), InventoryError> {
    let item = equipment
        .get(slot)
        .map(str::to_string)
        .ok_or(InventoryError::SlotEmpty { slot: slot.key() })?;
    inventory.add(db, &item, 1)?;
    equipment.clear(slot);
    Ok(())
}

/// A single stack of ammunition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quiver {
    pub stack: Option<ItemStack>,
}

impl Quiver {
    pub fn ammo_count(&self) -> u32 {
        self.stack.as_ref().map(|stack| stack.qty).unwrap_or(0)
    }

    /// Consumes one unit, returning the ammo id.
    pub fn consume_one(&mut self) -> Option<String> {
        let stack = self.stack.as_mut()?;
        stack.qty = stack.qty.saturating_sub(1);
        let item = stack.item.clone();
        if stack.qty == 0 {
            self.stack = None;
        }
        Some(item)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wallet {
    gold: u64,
}

impl Wallet {
    pub fn with_gold(gold: u64) -> Self {
        Self {
            gold: gold.min(MAX_GOLD),
        }
    }

    pub fn gold(&self) -> u64 {
        self.gold
    }

    pub fn credit(&mut self, amount: u64) {
        self.gold = self.gold.saturating_add(amount).min(MAX_GOLD);
    }

    pub fn debit(&mut self, amount: u64) -> Result<(), InventoryError> {
        if self.gold < amount {
            return Err(InventoryError::NotEnoughGold {
                have: self.gold,
                need: amount,
            });
        }
        self.gold -= amount;
        Ok(())
    }
}

pub fn sell_price(value: u32) -> u64 {
    value as u64 * SELL_RATIO_PERCENT / 100
}

pub fn buy(
    db: &DefDatabase,
    inventory: &mut Inventory,
    wallet: &mut Wallet,
    item: &str,
    qty: u32,
) -> Result<u64, InventoryError> {
    let def = db.item(item).ok_or_else(|| InventoryError::UnknownItem {
        item: item.to_string(),
    })?;
    if qty == 0 {
        return Err(InventoryError::ZeroQuantity);
    }
    let cost = def.value as u64 * qty as u64;
    if wallet.gold() < cost {
        return Err(InventoryError::NotEnoughGold {
            have: wallet.gold(),
            need: cost,
        });
    }
    inventory.add(db, item, qty)?;
    wallet.debit(cost)?;
    Ok(cost)
}

pub fn sell(
    db: &DefDatabase,
    inventory: &mut Inventory,
    wallet: &mut Wallet,
    item: &str,
    qty: u32,
) -> Result<u64, InventoryError> {
    let def = db.item(item).ok_or_else(|| InventoryError::UnknownItem {
        item: item.to_string(),
    })?;
    inventory.remove(item, qty)?;
    let proceeds = sell_price(def.value) * qty as u64;
    wallet.credit(proceeds);
    Ok(proceeds)
}

#[cfg(test)]
mod tests {
    use crate::content::builtin_def_database;

    use super::*;

    #[test]
    fn non_stackables_take_one_slot_each_and_add_is_atomic() {
        let db = builtin_def_database().expect("defs");
        let mut inventory = Inventory::new();
        inventory.add(&db, "logs", 27).expect("27 logs");
        assert_eq!(inventory.free_slots(), 1);
        assert!(matches!(
            inventory.add(&db, "logs", 2),
            Err(InventoryError::Full { .. })
        ));
        assert_eq!(inventory.count("logs"), 27);
        inventory.add(&db, "bronze_arrows", 50).expect("arrows");
        inventory.add(&db, "bronze_arrows", 50).expect("more arrows stack");
        assert_eq!(inventory.count("bronze_arrows"), 100);
        assert_eq!(inventory.free_slots(), 0);
    }

    #[test]
    fn remove_is_all_or_nothing() {
        let db = builtin_def_database().expect("defs");
        let mut inventory = Inventory::new();
        inventory.add(&db, "copper_ore", 2).expect("ore");
        assert!(matches!(
            inventory.remove("copper_ore", 3),
            Err(InventoryError::NotEnough { have: 2, .. })
        ));
        inventory.remove("copper_ore", 2).expect("remove");
        assert_eq!(inventory.free_slots(), INVENTORY_SLOTS);
    }

    #[test]
    fn bank_respects_capacity_and_stacks_everything() {
        let db = builtin_def_database().expect("defs");
        let mut inventory = Inventory::new();
        let mut bank = Bank::with_capacity(1);
        inventory.add(&db, "logs", 3).expect("logs");
        inventory.add(&db, "tin_ore", 1).expect("tin");
        deposit(&mut inventory, &mut bank, "logs", 3).expect("deposit");
        assert_eq!(bank.count("logs"), 3);
        assert_eq!(bank.stacks().len(), 1);
        assert!(matches!(
            deposit(&mut inventory, &mut bank, "tin_ore", 1),
            Err(InventoryError::BankFull { capacity: 1 })
        ));
        assert_eq!(inventory.count("tin_ore"), 1);
        withdraw(&db, &mut inventory, &mut bank, "logs", 2).expect("withdraw");
        assert_eq!(inventory.count("logs"), 2);
        assert_eq!(bank.count("logs"), 1);
    }

    #[test]
    fn equip_swaps_previous_item_back() {
        let db = builtin_def_database().expect("defs");
        let mut inventory = Inventory::new();
        let mut equipment = Equipment::default();
        let mut quiver = Quiver::default();
        inventory.add(&db, "bronze_sword", 1).expect("sword");
        inventory.add(&db, "shortbow", 1).expect("bow");
        equip(&db, &mut inventory, &mut equipment, &mut quiver, "bronze_sword").expect("equip");
        equip(&db, &mut inventory, &mut equipment, &mut quiver, "shortbow").expect("swap");
        assert_eq!(equipment.get(EquipSlot::Weapon), Some("shortbow"));
        assert_eq!(inventory.count("bronze_sword"), 1);
        assert!(matches!(
            equip(&db, &mut inventory, &mut equipment, &mut quiver, "logs"),
            Err(InventoryError::UnknownItem { .. }) | Err(InventoryError::NotEquippable { .. })
        ));
        unequip(&db, &mut inventory, &mut equipment, EquipSlot::Weapon).expect("unequip");
        assert_eq!(equipment.get(EquipSlot::Weapon), None);
        assert_eq!(inventory.count("shortbow"), 1);
    }

    #[test]
    fn ammo_goes_to_quiver() {
        let db = builtin_def_database().expect("defs");
        let mut inventory = Inventory::new();
        let mut equipment = Equipment::default();
        let mut quiver = Quiver::default();
        inventory.add(&db, "bronze_arrows", 12).expect("arrows");
        equip(&db, &mut inventory, &mut equipment, &mut quiver, "bronze_arrows").expect("quiver");
        assert_eq!(quiver.ammo_count(), 12);
        assert_eq!(inventory.count("bronze_arrows"), 0);
        assert_eq!(quiver.consume_one().as_deref(), Some("bronze_arrows"));
        assert_eq!(quiver.ammo_count(), 11);
    }

    #[test]
    fn vendor_sells_at_value_and_buys_back_at_forty_percent() {
        let db = builtin_def_database().expect("defs");
        let mut inventory = Inventory::new();
        let mut wallet = Wallet::with_gold(10);
        assert_eq!(buy(&db, &mut inventory, &mut wallet, "raw_shrimp", 2).expect("buy"), 10);
        assert_eq!(wallet.gold(), 0);
        assert!(matches!(
            buy(&db, &mut inventory, &mut wallet, "tinderbox", 1),
            Err(InventoryError::NotEnoughGold { .. })
        ));
        assert_eq!(sell(&db, &mut inventory, &mut wallet, "raw_shrimp", 2).expect("sell"), 4);
        assert_eq!(wallet.gold(), 4);
    }

    #[test]
    fn wallet_clamps_to_max_gold() {
        let mut wallet = Wallet::with_gold(u64::MAX);
        assert_eq!(wallet.gold(), MAX_GOLD);
        wallet.credit(10);
        assert_eq!(wallet.gold(), MAX_GOLD);
    }
}
